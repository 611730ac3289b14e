//! KV-backed access token lifecycle.
//!
//! The token is cached in the shared store under [`ACCESS_TOKEN_KEY`] with the
//! time it was minted. Every check re-reads the store, so all instances that
//! share a backend see the same token. Two callers that find the token stale
//! at the same moment may both refresh; the later write wins.

use std::sync::Arc;
use std::time::Duration;

use hat_core::{current_unix_timestamp_ms, current_unix_timestamp_secs_f64, redact_secret};
use hat_kv::{get_json, set_json, KvError, KvStore};
use serde::{Deserialize, Serialize};

use crate::{WeiboApiClient, WeiboError};

pub const ACCESS_TOKEN_KEY: &str = "weibo:access_token";
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_AUTHORIZE_NONCE: &str = "eqiojronqnr";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Token record as persisted in the store. `created_at` is Unix seconds.
pub struct CachedToken {
    pub token: String,
    pub created_at: f64,
}

impl CachedToken {
    pub fn is_fresh(&self, ttl: Duration, now_unix_secs: f64) -> bool {
        if self.token.trim().is_empty() || !self.created_at.is_finite() {
            return false;
        }
        now_unix_secs - self.created_at < ttl.as_secs_f64()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Outcome of [`TokenLifecycleManager::check_token`].
pub struct TokenCheck {
    pub valid: bool,
    pub token: Option<String>,
}

impl TokenCheck {
    fn invalid() -> Self {
        Self {
            valid: false,
            token: None,
        }
    }
}

#[derive(Clone, Default)]
/// App credentials used to sign authorization requests.
pub struct WeiboCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub device_uid: Option<String>,
}

impl std::fmt::Debug for WeiboCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeiboCredentials")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_deref().map(redact_secret),
            )
            .field("device_uid", &self.device_uid)
            .finish()
    }
}

impl WeiboCredentials {
    fn require(&self) -> Result<(&str, &str, &str), WeiboError> {
        fn present<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, WeiboError> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| WeiboError::Auth(format!("{name} is not configured")))
        }
        Ok((
            present(&self.client_id, "client id")?,
            present(&self.client_secret, "client secret")?,
            present(&self.device_uid, "device uid")?,
        ))
    }
}

#[derive(Debug, Clone)]
/// Public struct `TokenManagerConfig` used across sorting-hat components.
pub struct TokenManagerConfig {
    pub credentials: WeiboCredentials,
    pub ttl: Duration,
    pub nonce: String,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            credentials: WeiboCredentials::default(),
            ttl: DEFAULT_TOKEN_TTL,
            nonce: DEFAULT_AUTHORIZE_NONCE.to_string(),
        }
    }
}

/// MD5 hex digest of `client_id&device_uid&timestamp&nonce&client_secret`.
pub fn authorize_signature(
    client_id: &str,
    device_uid: &str,
    timestamp_ms: &str,
    nonce: &str,
    client_secret: &str,
) -> String {
    let joined = [client_id, device_uid, timestamp_ms, nonce, client_secret].join("&");
    format!("{:x}", md5::compute(joined.as_bytes()))
}

/// Hands out platform access tokens, refreshing through the signed
/// authorization endpoint once the cached one is older than the TTL.
pub struct TokenLifecycleManager {
    store: Arc<dyn KvStore>,
    api: WeiboApiClient,
    config: TokenManagerConfig,
}

impl TokenLifecycleManager {
    pub fn new(store: Arc<dyn KvStore>, api: WeiboApiClient, config: TokenManagerConfig) -> Self {
        Self { store, api, config }
    }

    /// Reports whether the stored token is still inside the TTL window.
    /// An absent or malformed record is reported as invalid.
    pub async fn check_token(&self) -> Result<TokenCheck, WeiboError> {
        let cached = match get_json::<CachedToken>(self.store.as_ref(), ACCESS_TOKEN_KEY).await {
            Ok(cached) => cached,
            Err(KvError::Serialization { key, source }) => {
                tracing::warn!(%key, %source, "ignoring malformed cached token record");
                None
            }
            Err(error) => return Err(error.into()),
        };
        let Some(cached) = cached else {
            return Ok(TokenCheck::invalid());
        };
        if !cached.is_fresh(self.config.ttl, current_unix_timestamp_secs_f64()) {
            tracing::debug!(created_at = cached.created_at, "cached access token is stale");
            return Ok(TokenCheck::invalid());
        }
        Ok(TokenCheck {
            valid: true,
            token: Some(cached.token),
        })
    }

    /// Mints a new token regardless of the cached one and stores it.
    pub async fn refresh_token(&self) -> Result<String, WeiboError> {
        let (client_id, client_secret, device_uid) = self.config.credentials.require()?;
        let timestamp_ms = current_unix_timestamp_ms().to_string();
        let sign = authorize_signature(
            client_id,
            device_uid,
            &timestamp_ms,
            &self.config.nonce,
            client_secret,
        );
        tracing::info!(
            client_id,
            timestamp_ms = %timestamp_ms,
            "refreshing platform access token"
        );

        let token = self
            .api
            .authorize(client_id, &timestamp_ms, &self.config.nonce, &sign)
            .await?;
        let record = CachedToken {
            token: token.clone(),
            created_at: current_unix_timestamp_secs_f64(),
        };
        set_json(self.store.as_ref(), ACCESS_TOKEN_KEY, &record).await?;
        tracing::info!(token = %redact_secret(&token), "platform access token refreshed");
        Ok(token)
    }

    /// Returns the cached token while fresh, otherwise refreshes exactly once.
    pub async fn get_token(&self) -> Result<String, WeiboError> {
        if let TokenCheck {
            valid: true,
            token: Some(token),
        } = self.check_token().await?
        {
            return Ok(token);
        }
        self.refresh_token().await
    }
}
