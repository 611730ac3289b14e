use hat_ai::HatAiError;
use hat_kv::KvError;
use thiserror::Error;

/// Platform error code returned when the access token has expired.
pub const TOKEN_EXPIRED_ERROR_CODE: u64 = 21332;

#[derive(Debug, Error)]
/// Enumerates supported `WeiboError` values.
pub enum WeiboError {
    #[error("authorization failed: {0}")]
    Auth(String),
    #[error(transparent)]
    StoreUnavailable(#[from] KvError),
    #[error("access token rejected by platform (error code 21332)")]
    TokenExpired,
    #[error("platform request failed with status {status} (error code {error_code:?}): {body}")]
    TransientHttp {
        status: u16,
        error_code: Option<u64>,
        body: String,
    },
    #[error("platform transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid platform response: {0}")]
    InvalidResponse(String),
    #[error("malformed webhook event: {0}")]
    InvalidEvent(String),
    #[error("model backend failed: {0}")]
    Llm(#[from] HatAiError),
}

impl WeiboError {
    pub fn is_token_expired(&self) -> bool {
        matches!(self, Self::TokenExpired)
    }
}
