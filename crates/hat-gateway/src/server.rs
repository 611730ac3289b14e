use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use hat_core::current_unix_timestamp_secs_f64;
use hat_weibo::{EventProcessor, ImageRelay, WeiboEvent};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::{verify_handshake, BackgroundTasks};

pub const DEFAULT_WEBHOOK_BIND: &str = "0.0.0.0:8001";

#[derive(Debug, Clone)]
/// Public struct `WebhookServerConfig` used across sorting-hat components.
pub struct WebhookServerConfig {
    pub bind: String,
}

impl Default for WebhookServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_WEBHOOK_BIND.to_string(),
        }
    }
}

/// Shared state behind every route.
pub struct WebhookServerState {
    shared_token: Option<String>,
    processor: Arc<EventProcessor>,
    relay: ImageRelay,
    background: BackgroundTasks,
}

impl WebhookServerState {
    pub fn new(
        shared_token: Option<String>,
        processor: Arc<EventProcessor>,
        relay: ImageRelay,
    ) -> Self {
        Self {
            shared_token: shared_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            processor,
            relay,
            background: BackgroundTasks::new(),
        }
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }
}

#[derive(Debug, Default, Deserialize)]
struct CheckForm {
    nonce: Option<String>,
    timestamp: Option<String>,
    echostr: Option<String>,
    signature: Option<String>,
    event: Option<String>,
    content_type: Option<String>,
    content_body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    image_url: String,
}

pub fn build_webhook_router(state: Arc<WebhookServerState>) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/ping", get(handle_ping))
        .route("/check", post(handle_check))
        .route("/upload", post(handle_upload))
        .with_state(state)
}

/// Binds `config.bind` and serves until Ctrl-C, then drains background units.
pub async fn run_webhook_server(
    config: WebhookServerConfig,
    state: Arc<WebhookServerState>,
) -> Result<()> {
    let bind_addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid --bind '{}': expected host:port", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind webhook server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve webhook server listen address")?;
    tracing::info!(addr = %local_addr, "webhook server listening");

    serve_webhook(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

/// Serves on an already bound listener until `shutdown` resolves.
pub async fn serve_webhook<F>(
    listener: TcpListener,
    state: Arc<WebhookServerState>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_webhook_router(Arc::clone(&state));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("webhook server exited unexpectedly")?;

    let pending = state.background.pending().await;
    tracing::info!(pending, "webhook server stopped; draining background units");
    let drained = state.background.drain().await;
    tracing::info!(drained, "background units drained");
    Ok(())
}

async fn handle_root() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

async fn handle_ping() -> impl IntoResponse {
    Json(json!({
        "res": "pong",
        "version": env!("CARGO_PKG_VERSION"),
        "time": current_unix_timestamp_secs_f64(),
    }))
}

async fn handle_check(
    State(state): State<Arc<WebhookServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(form): Form<CheckForm>,
) -> Response {
    if let Some(echostr) = form.echostr {
        tracing::info!(
            nonce = form.nonce.as_deref().unwrap_or("-"),
            timestamp = form.timestamp.as_deref().unwrap_or("-"),
            "webhook validation handshake"
        );
        return match verify_handshake(
            state.shared_token.as_deref(),
            form.timestamp.as_deref(),
            form.nonce.as_deref(),
            form.signature.as_deref(),
        ) {
            Ok(()) => (StatusCode::OK, echostr).into_response(),
            Err(error) => {
                tracing::error!(%error, "webhook validation handshake failed");
                (StatusCode::FORBIDDEN, "").into_response()
            }
        };
    }

    let action = form.event.as_deref().unwrap_or_default().trim();
    if !action.eq_ignore_ascii_case("add") {
        tracing::debug!(action, "ignoring non-add event delivery");
        return event_ack();
    }

    let event = match WeiboEvent::parse(
        action,
        form.content_type.as_deref(),
        form.content_body.as_deref(),
    ) {
        Ok(event) => event,
        Err(error) => {
            tracing::warn!(%error, "dropping undecodable event delivery");
            return event_ack();
        }
    };

    let reply_ip = client_ip(&headers, peer);
    let processor = Arc::clone(&state.processor);
    state
        .background
        .spawn(async move {
            let outcome = processor.process(&event, &reply_ip).await;
            tracing::debug!(event_id = %event.id, ?outcome, "background unit finished");
        })
        .await;
    event_ack()
}

async fn handle_upload(
    State(state): State<Arc<WebhookServerState>>,
    Query(query): Query<UploadQuery>,
) -> Json<String> {
    match state.relay.relay(&query.image_url).await {
        Ok(hosted) => Json(hosted),
        Err(error) => {
            tracing::warn!(%error, image_url = %query.image_url, "picture upload failed");
            Json(String::new())
        }
    }
}

fn event_ack() -> Response {
    Json(json!({"result": true, "pull_later": false, "message": ""})).into_response()
}

/// The caller's address: first `X-Forwarded-For` hop when present, else the
/// socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}
