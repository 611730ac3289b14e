//! Bounded-retry comment posting with forced token refresh on expiry.

use std::sync::Arc;
use std::time::Duration;

use crate::{CommentRequest, CommentTarget, TokenLifecycleManager, WeiboApiClient, WeiboError};

pub const DEFAULT_DISPATCH_MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
/// Public struct `DispatcherConfig` used across sorting-hat components.
pub struct DispatcherConfig {
    pub max_attempts: usize,
    pub retry_delay_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_DISPATCH_MAX_ATTEMPTS,
            retry_delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `DispatchOutcome` values.
pub enum DispatchOutcome {
    Delivered {
        attempts: usize,
        comment_id: Option<String>,
    },
    GaveUp {
        attempts: usize,
        last_error: String,
    },
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn attempts(&self) -> usize {
        match self {
            Self::Delivered { attempts, .. } | Self::GaveUp { attempts, .. } => *attempts,
        }
    }
}

enum TokenSource {
    Cached,
    ForceRefresh,
    Reuse(String),
}

/// Posts comments, retrying up to `max_attempts` times.
///
/// A rejection with the expired-token code forces a refresh before the next
/// attempt; any other failure retries with the same token. Exhausting the
/// attempts is reported as [`DispatchOutcome::GaveUp`], never as an error.
pub struct CommentDispatcher {
    api: WeiboApiClient,
    tokens: Arc<TokenLifecycleManager>,
    config: DispatcherConfig,
}

impl CommentDispatcher {
    pub fn new(
        api: WeiboApiClient,
        tokens: Arc<TokenLifecycleManager>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            api,
            tokens,
            config,
        }
    }

    pub async fn post_comment(
        &self,
        target: CommentTarget,
        reply_ip: &str,
        text: &str,
    ) -> DispatchOutcome {
        self.dispatch(&CommentRequest::new(target, reply_ip, text)).await
    }

    pub async fn dispatch(&self, request: &CommentRequest) -> DispatchOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut source = TokenSource::Cached;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let token = match self.resolve_token(source).await {
                Ok(token) => token,
                Err(error) => {
                    tracing::warn!(attempt, %error, "could not obtain access token for comment");
                    last_error = error.to_string();
                    source = TokenSource::Cached;
                    self.pause_before(attempt, max_attempts).await;
                    continue;
                }
            };

            tracing::info!(
                attempt,
                max_attempts,
                payload = %request.log_payload(&token),
                "posting comment"
            );
            match self.api.post_comment(&token, request).await {
                Ok(posted) => {
                    tracing::info!(
                        attempt,
                        comment_id = posted.comment_id.as_deref().unwrap_or("-"),
                        "comment posted"
                    );
                    return DispatchOutcome::Delivered {
                        attempts: attempt,
                        comment_id: posted.comment_id,
                    };
                }
                Err(WeiboError::TokenExpired) => {
                    tracing::info!(attempt, "access token expired upstream; forcing refresh");
                    last_error = WeiboError::TokenExpired.to_string();
                    source = TokenSource::ForceRefresh;
                }
                Err(error) => {
                    tracing::warn!(attempt, %error, "comment post failed");
                    last_error = error.to_string();
                    source = TokenSource::Reuse(token);
                }
            }
            self.pause_before(attempt, max_attempts).await;
        }

        tracing::warn!(
            attempts = max_attempts,
            last_error = %last_error,
            target = ?request.target,
            "giving up on comment"
        );
        DispatchOutcome::GaveUp {
            attempts: max_attempts,
            last_error,
        }
    }

    async fn resolve_token(&self, source: TokenSource) -> Result<String, WeiboError> {
        match source {
            TokenSource::Cached => self.tokens.get_token().await,
            TokenSource::ForceRefresh => self.tokens.refresh_token().await,
            TokenSource::Reuse(token) => Ok(token),
        }
    }

    async fn pause_before(&self, attempt: usize, max_attempts: usize) {
        if attempt < max_attempts && self.config.retry_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hat_core::current_unix_timestamp_secs_f64;
    use hat_kv::{set_json, KvStore, MemoryKvStore};
    use httpmock::prelude::*;
    use serde_json::json;

    use super::{CommentDispatcher, DispatchOutcome, DispatcherConfig};
    use crate::{
        CachedToken, CommentTarget, TokenLifecycleManager, TokenManagerConfig, WeiboApiClient,
        WeiboApiConfig, WeiboCredentials, ACCESS_TOKEN_KEY,
    };

    async fn dispatcher_for(server: &MockServer, cached_token: Option<&str>) -> CommentDispatcher {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        if let Some(token) = cached_token {
            set_json(
                store.as_ref(),
                ACCESS_TOKEN_KEY,
                &CachedToken {
                    token: token.to_string(),
                    created_at: current_unix_timestamp_secs_f64(),
                },
            )
            .await
            .expect("seed token");
        }
        let api = WeiboApiClient::new(WeiboApiConfig {
            api_base: server.base_url(),
            request_timeout_ms: 2_000,
        })
        .expect("client");
        let tokens = Arc::new(TokenLifecycleManager::new(
            store,
            api.clone(),
            TokenManagerConfig {
                credentials: WeiboCredentials {
                    client_id: Some("app-key".to_string()),
                    client_secret: Some("app-secret".to_string()),
                    device_uid: Some("dev-uid".to_string()),
                },
                ..TokenManagerConfig::default()
            },
        ));
        CommentDispatcher::new(
            api,
            tokens,
            DispatcherConfig {
                max_attempts: 3,
                retry_delay_ms: 1,
            },
        )
    }

    fn status_target() -> CommentTarget {
        CommentTarget::Create {
            status_id: "100".to_string(),
        }
    }

    #[tokio::test]
    async fn functional_delivers_on_first_attempt_with_cached_token() {
        let server = MockServer::start();
        let authorize = server.mock(|when, then| {
            when.method(GET).path("/oauth2/vp/authorize");
            then.status(200).json_body(json!({"access_token": "unused"}));
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/2/comments/create.json")
                .body_includes("access_token=cached-token")
                .body_includes("id=100")
                .body_includes("rip=1.2.3.4");
            then.status(200).json_body(json!({"id": 900}));
        });
        let dispatcher = dispatcher_for(&server, Some("cached-token")).await;
        let outcome = dispatcher
            .post_comment(status_target(), "1.2.3.4", "hello")
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                attempts: 1,
                comment_id: Some("900".to_string()),
            }
        );
        create.assert_calls(1);
        authorize.assert_calls(0);
    }

    #[tokio::test]
    async fn functional_expired_token_code_forces_one_refresh_then_succeeds() {
        let server = MockServer::start();
        let authorize = server.mock(|when, then| {
            when.method(GET).path("/oauth2/vp/authorize");
            then.status(200).json_body(json!({"access_token": "fresh-token"}));
        });
        let rejected = server.mock(|when, then| {
            when.method(POST)
                .path("/2/comments/reply.json")
                .body_includes("access_token=revoked-token");
            then.status(400)
                .json_body(json!({"error_code": 21332, "error": "expired_token"}));
        });
        let accepted = server.mock(|when, then| {
            when.method(POST)
                .path("/2/comments/reply.json")
                .body_includes("access_token=fresh-token")
                .body_includes("cid=200");
            then.status(200).json_body(json!({"id": 901}));
        });

        let dispatcher = dispatcher_for(&server, Some("revoked-token")).await;
        let outcome = dispatcher
            .post_comment(
                CommentTarget::Reply {
                    comment_id: "200".to_string(),
                    status_id: "100".to_string(),
                },
                "1.2.3.4",
                "hello",
            )
            .await;
        assert_eq!(outcome.attempts(), 2);
        assert!(outcome.is_delivered());
        rejected.assert_calls(1);
        authorize.assert_calls(1);
        accepted.assert_calls(1);
    }

    #[tokio::test]
    async fn functional_gives_up_after_three_failed_attempts() {
        let server = MockServer::start();
        let authorize = server.mock(|when, then| {
            when.method(GET).path("/oauth2/vp/authorize");
            then.status(200).json_body(json!({"access_token": "unused"}));
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/2/comments/create.json")
                .body_includes("access_token=cached-token");
            then.status(500)
                .json_body(json!({"error_code": 10001, "error": "system error"}));
        });
        let dispatcher = dispatcher_for(&server, Some("cached-token")).await;
        let outcome = dispatcher
            .post_comment(status_target(), "1.2.3.4", "hello")
            .await;
        match outcome {
            DispatchOutcome::GaveUp {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("10001"), "{last_error}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        create.assert_calls(3);
        authorize.assert_calls(0);
    }

    #[tokio::test]
    async fn regression_persistent_expiry_refreshes_each_time_and_stops_at_bound() {
        let server = MockServer::start();
        let authorize = server.mock(|when, then| {
            when.method(GET).path("/oauth2/vp/authorize");
            then.status(200).json_body(json!({"access_token": "still-bad"}));
        });
        let create = server.mock(|when, then| {
            when.method(POST).path("/2/comments/create.json");
            then.status(400).json_body(json!({"error_code": 21332}));
        });
        let dispatcher = dispatcher_for(&server, Some("revoked-token")).await;
        let outcome = dispatcher
            .post_comment(status_target(), "1.2.3.4", "hello")
            .await;
        assert!(!outcome.is_delivered());
        assert_eq!(outcome.attempts(), 3);
        create.assert_calls(3);
        authorize.assert_calls(2);
    }

    #[tokio::test]
    async fn regression_token_acquisition_failure_consumes_attempts() {
        let server = MockServer::start();
        let authorize = server.mock(|when, then| {
            when.method(GET).path("/oauth2/vp/authorize");
            then.status(200).json_body(json!({"error": "invalid sign"}));
        });
        let create = server.mock(|when, then| {
            when.method(POST).path("/2/comments/create.json");
            then.status(200).json_body(json!({"id": 1}));
        });
        let dispatcher = dispatcher_for(&server, None).await;
        let outcome = dispatcher
            .post_comment(status_target(), "1.2.3.4", "hello")
            .await;
        match outcome {
            DispatchOutcome::GaveUp {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("access_token"), "{last_error}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        authorize.assert_calls(3);
        create.assert_calls(0);
    }
}
