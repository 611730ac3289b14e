//! Weibo side of the sorting-hat bridge.
//!
//! Holds the platform API client, the KV-backed token lifecycle, the
//! duplicate-delivery filter, the comment dispatcher with its expiry-aware
//! retry loop, the 140-character text chunker, and the event processor that
//! ties them together for one webhook delivery.

mod api_client;
mod chunker;
mod dedup;
mod dispatcher;
mod error;
mod event;
mod image_relay;
mod processor;
mod token_manager;

pub use api_client::{
    pic_id_from_url, CommentPosted, CommentRequest, CommentTarget, WeiboApiClient,
    WeiboApiConfig, DEFAULT_WEIBO_API_BASE,
};
pub use chunker::{TextChunker, WEIBO_COMMENT_MAX_CHARS};
pub use dedup::{DeliveryFilter, EventKey, SEEN_MARKER_VALUE};
pub use dispatcher::{
    CommentDispatcher, DispatchOutcome, DispatcherConfig, DEFAULT_DISPATCH_MAX_ATTEMPTS,
};
pub use error::{WeiboError, TOKEN_EXPIRED_ERROR_CODE};
pub use event::{EventKind, WeiboEvent, WeiboImage};
pub use image_relay::ImageRelay;
pub use processor::{
    EventProcessor, EventProcessorConfig, ProcessOutcome, DEFAULT_MENTION_TEXT, DEFAULT_REPLY_MODEL,
};
pub use token_manager::{
    authorize_signature, CachedToken, TokenCheck, TokenLifecycleManager, TokenManagerConfig,
    WeiboCredentials, ACCESS_TOKEN_KEY, DEFAULT_AUTHORIZE_NONCE, DEFAULT_TOKEN_TTL,
};
