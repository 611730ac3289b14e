//! Webhook HTTP surface for sorting-hat.
//!
//! `POST /check` answers the platform's validation handshake and accepts
//! event deliveries; each accepted event is handed to a tracked background
//! unit so the platform gets its acknowledgment immediately.

mod background;
mod handshake;
mod server;

pub use background::BackgroundTasks;
pub use handshake::{compute_handshake_signature, verify_handshake, HandshakeError};
pub use server::{
    build_webhook_router, run_webhook_server, serve_webhook, WebhookServerConfig,
    WebhookServerState, DEFAULT_WEBHOOK_BIND,
};
