//! Re-hosts an external picture on the platform so it can be attached to
//! comments.

use std::sync::Arc;

use crate::{TokenLifecycleManager, WeiboApiClient, WeiboError};

#[derive(Clone)]
/// Public struct `ImageRelay` used across sorting-hat components.
pub struct ImageRelay {
    api: WeiboApiClient,
    tokens: Arc<TokenLifecycleManager>,
}

impl ImageRelay {
    pub fn new(api: WeiboApiClient, tokens: Arc<TokenLifecycleManager>) -> Self {
        Self { api, tokens }
    }

    /// Downloads `image_url` and uploads it, returning the hosted URL. An
    /// expired-token rejection is retried once with a refreshed token.
    pub async fn relay(&self, image_url: &str) -> Result<String, WeiboError> {
        let bytes = self.api.download_image(image_url).await?;
        tracing::info!(image_url, bytes = bytes.len(), "uploading picture");
        let token = self.tokens.get_token().await?;
        match self.api.upload_image(&token, bytes.clone()).await {
            Err(WeiboError::TokenExpired) => {
                let token = self.tokens.refresh_token().await?;
                self.api.upload_image(&token, bytes).await
            }
            other => other,
        }
    }
}
