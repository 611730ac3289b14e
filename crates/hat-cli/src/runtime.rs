use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hat_ai::{HttpVisionClient, HttpVisionConfig, OpenAiClient, OpenAiConfig};
use hat_gateway::{run_webhook_server, WebhookServerConfig, WebhookServerState};
use hat_kv::{KvStore, MemoryKvStore, RedbKvStore, RestKvConfig, RestKvStore};
use hat_weibo::{
    CommentDispatcher, DeliveryFilter, DispatcherConfig, EventProcessor, EventProcessorConfig,
    ImageRelay, TokenLifecycleManager, TokenManagerConfig, WeiboApiClient, WeiboApiConfig,
    WeiboCredentials,
};

use crate::{Cli, CliKvBackend};

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn build_kv_store(cli: &Cli) -> Result<Arc<dyn KvStore>> {
    let store: Arc<dyn KvStore> = match cli.kv_backend {
        CliKvBackend::Memory => {
            tracing::warn!("using in-memory key-value store; state is lost on restart");
            Arc::new(MemoryKvStore::new())
        }
        CliKvBackend::Redb => Arc::new(
            RedbKvStore::open(&cli.kv_path)
                .with_context(|| format!("failed to open {}", cli.kv_path.display()))?,
        ),
        CliKvBackend::Rest => {
            let (Some(url), Some(token)) =
                (non_empty(&cli.kv_rest_url), non_empty(&cli.kv_rest_token))
            else {
                bail!("--kv-backend=rest requires --kv-rest-url and --kv-rest-token");
            };
            Arc::new(
                RestKvStore::new(RestKvConfig {
                    url,
                    token,
                    request_timeout_ms: cli.request_timeout_ms,
                })
                .context("failed to create rest key-value client")?,
            )
        }
    };
    Ok(store)
}

pub fn load_system_prompt(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read system prompt file '{}'", path.display()))
}

pub fn build_server_state(cli: &Cli) -> Result<Arc<WebhookServerState>> {
    let store = build_kv_store(cli)?;
    let system_prompt = load_system_prompt(&cli.system_prompt_file)?;

    let api = WeiboApiClient::new(WeiboApiConfig {
        api_base: cli.weibo_api_base.clone(),
        request_timeout_ms: cli.request_timeout_ms,
    })
    .context("failed to create weibo api client")?;
    let credentials = WeiboCredentials {
        client_id: non_empty(&cli.app_key),
        client_secret: non_empty(&cli.app_secret),
        device_uid: non_empty(&cli.dev_uid),
    };
    if credentials.client_id.is_none()
        || credentials.client_secret.is_none()
        || credentials.device_uid.is_none()
    {
        tracing::warn!("APP_KEY, APP_SECRET or DEV_UID is unset; token refresh will fail");
    }
    let tokens = Arc::new(TokenLifecycleManager::new(
        Arc::clone(&store),
        api.clone(),
        TokenManagerConfig {
            credentials,
            ttl: Duration::from_secs(cli.token_ttl_secs),
            nonce: cli.authorize_nonce.clone(),
        },
    ));
    let dispatcher = Arc::new(CommentDispatcher::new(
        api.clone(),
        Arc::clone(&tokens),
        DispatcherConfig {
            max_attempts: cli.dispatch_max_attempts,
            retry_delay_ms: cli.dispatch_retry_delay_ms,
        },
    ));

    let llm = OpenAiClient::new(OpenAiConfig {
        api_base: cli.llm_api_base.clone(),
        api_key: non_empty(&cli.api_key).unwrap_or_default(),
        request_timeout_ms: cli.llm_request_timeout_ms,
        max_retries: cli.llm_max_retries,
        retry_budget_ms: cli.llm_retry_budget_ms,
    })
    .context("failed to create chat completion client (is API_KEY set?)")?;

    let marker_ttl =
        (cli.dedup_marker_ttl_secs > 0).then(|| Duration::from_secs(cli.dedup_marker_ttl_secs));
    let mention_text = Some(cli.mention_text.trim().to_string()).filter(|text| !text.is_empty());
    let mut processor = EventProcessor::new(
        DeliveryFilter::new(store, marker_ttl),
        Arc::new(llm),
        dispatcher,
        EventProcessorConfig {
            system_prompt,
            model: cli.model.clone(),
            max_tokens: cli.max_tokens,
            temperature: cli.temperature,
            mention_text,
            placeholder_on_failure: cli.placeholder_on_llm_failure,
        },
    );
    if let Some(endpoint) = non_empty(&cli.vlm_endpoint) {
        let vision = HttpVisionClient::new(HttpVisionConfig {
            endpoint,
            request_timeout_ms: cli.request_timeout_ms,
        })
        .context("failed to create vision client")?;
        processor = processor.with_vision(Arc::new(vision));
    }

    if non_empty(&cli.weibo_token).is_none() {
        tracing::warn!("WEIBO_TOKEN is unset; every validation handshake will be rejected");
    }
    Ok(Arc::new(WebhookServerState::new(
        cli.weibo_token.clone(),
        Arc::new(processor),
        ImageRelay::new(api, tokens),
    )))
}

pub async fn run(cli: Cli) -> Result<()> {
    let state = build_server_state(&cli)?;
    run_webhook_server(
        WebhookServerConfig {
            bind: cli.bind.clone(),
        },
        state,
    )
    .await
}
