use std::path::PathBuf;

use clap::{ArgAction, Parser};
use hat_weibo::{
    DEFAULT_AUTHORIZE_NONCE, DEFAULT_MENTION_TEXT, DEFAULT_REPLY_MODEL, DEFAULT_WEIBO_API_BASE,
};

use crate::CliKvBackend;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_temperature(value: &str) -> Result<f32, String> {
    let parsed = value
        .parse::<f32>()
        .map_err(|error| format!("failed to parse float: {error}"))?;
    if !parsed.is_finite() || !(0.0..=2.0).contains(&parsed) {
        return Err("value must be in range 0.0..=2.0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "sorting-hat",
    about = "Weibo push webhook that answers mentions and comments with LLM replies",
    version
)]
/// Public struct `Cli` used across sorting-hat components.
pub struct Cli {
    #[arg(
        long,
        env = "SORTING_HAT_BIND",
        default_value = hat_gateway::DEFAULT_WEBHOOK_BIND,
        help = "Socket address the webhook server listens on"
    )]
    pub bind: String,

    #[arg(
        long = "weibo-token",
        env = "WEIBO_TOKEN",
        hide_env_values = true,
        help = "Shared token used to verify the webhook validation handshake"
    )]
    pub weibo_token: Option<String>,

    #[arg(
        long = "app-key",
        env = "APP_KEY",
        help = "Platform app key (client id) used to sign token requests"
    )]
    pub app_key: Option<String>,

    #[arg(
        long = "app-secret",
        env = "APP_SECRET",
        hide_env_values = true,
        help = "Platform app secret used to sign token requests"
    )]
    pub app_secret: Option<String>,

    #[arg(
        long = "dev-uid",
        env = "DEV_UID",
        help = "Developer account uid included in the token request signature"
    )]
    pub dev_uid: Option<String>,

    #[arg(
        long = "weibo-api-base",
        env = "SORTING_HAT_WEIBO_API_BASE",
        default_value = DEFAULT_WEIBO_API_BASE,
        help = "Base URL for the Weibo open platform API"
    )]
    pub weibo_api_base: String,

    #[arg(
        long = "authorize-nonce",
        env = "SORTING_HAT_AUTHORIZE_NONCE",
        default_value = DEFAULT_AUTHORIZE_NONCE,
        help = "Nonce sent with signed token requests"
    )]
    pub authorize_nonce: String,

    #[arg(
        long = "token-ttl-secs",
        env = "SORTING_HAT_TOKEN_TTL_SECS",
        default_value_t = 60,
        value_parser = parse_positive_u64,
        help = "Seconds a cached access token is reused before it is refreshed"
    )]
    pub token_ttl_secs: u64,

    #[arg(
        long = "dedup-marker-ttl-secs",
        env = "SORTING_HAT_DEDUP_MARKER_TTL_SECS",
        default_value_t = 0,
        help = "Seconds a seen-event marker is kept; 0 keeps markers forever"
    )]
    pub dedup_marker_ttl_secs: u64,

    #[arg(
        long = "dispatch-max-attempts",
        env = "SORTING_HAT_DISPATCH_MAX_ATTEMPTS",
        default_value_t = hat_weibo::DEFAULT_DISPATCH_MAX_ATTEMPTS,
        value_parser = parse_positive_usize,
        help = "Attempts per comment before giving up"
    )]
    pub dispatch_max_attempts: usize,

    #[arg(
        long = "dispatch-retry-delay-ms",
        env = "SORTING_HAT_DISPATCH_RETRY_DELAY_MS",
        default_value_t = 250,
        help = "Pause between comment attempts"
    )]
    pub dispatch_retry_delay_ms: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "SORTING_HAT_REQUEST_TIMEOUT_MS",
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "Timeout for platform, key-value and vision requests"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "llm-api-base",
        env = "SORTING_HAT_LLM_API_BASE",
        default_value = "https://api.deepseek.com",
        help = "Base URL for the OpenAI-compatible chat completion API"
    )]
    pub llm_api_base: String,

    #[arg(
        long = "api-key",
        env = "API_KEY",
        hide_env_values = true,
        help = "Bearer key for the chat completion API"
    )]
    pub api_key: Option<String>,

    #[arg(
        long,
        env = "SORTING_HAT_MODEL",
        default_value = DEFAULT_REPLY_MODEL,
        help = "Chat completion model name"
    )]
    pub model: String,

    #[arg(
        long = "max-tokens",
        env = "SORTING_HAT_MAX_TOKENS",
        default_value_t = 4096,
        help = "Completion token limit per reply"
    )]
    pub max_tokens: u32,

    #[arg(
        long,
        env = "SORTING_HAT_TEMPERATURE",
        default_value_t = 0.3,
        value_parser = parse_temperature,
        help = "Sampling temperature"
    )]
    pub temperature: f32,

    #[arg(
        long = "llm-request-timeout-ms",
        env = "SORTING_HAT_LLM_REQUEST_TIMEOUT_MS",
        default_value_t = 60_000,
        value_parser = parse_positive_u64,
        help = "Timeout for one chat completion request"
    )]
    pub llm_request_timeout_ms: u64,

    #[arg(
        long = "llm-max-retries",
        env = "SORTING_HAT_LLM_MAX_RETRIES",
        default_value_t = 2,
        help = "Retries for retryable chat completion failures"
    )]
    pub llm_max_retries: usize,

    #[arg(
        long = "llm-retry-budget-ms",
        env = "SORTING_HAT_LLM_RETRY_BUDGET_MS",
        default_value_t = 0,
        help = "Total backoff budget for chat completion retries; 0 disables the budget"
    )]
    pub llm_retry_budget_ms: u64,

    #[arg(
        long = "system-prompt-file",
        env = "SORTING_HAT_SYSTEM_PROMPT_FILE",
        default_value = "prompt.txt",
        help = "File whose contents are sent as the system prompt"
    )]
    pub system_prompt_file: PathBuf,

    #[arg(
        long = "mention-text",
        env = "SORTING_HAT_MENTION_TEXT",
        default_value = DEFAULT_MENTION_TEXT,
        help = "Status events are answered only when they contain this text; empty answers all"
    )]
    pub mention_text: String,

    #[arg(
        long = "placeholder-on-llm-failure",
        env = "SORTING_HAT_PLACEHOLDER_ON_LLM_FAILURE",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Post a static holding comment when the model call fails"
    )]
    pub placeholder_on_llm_failure: bool,

    #[arg(
        long = "vlm-endpoint",
        env = "VLM_BACKEND_ENDPOINT",
        help = "Optional vision backend that describes the first attached image"
    )]
    pub vlm_endpoint: Option<String>,

    #[arg(
        long = "kv-backend",
        env = "SORTING_HAT_KV_BACKEND",
        value_enum,
        default_value = "redb",
        help = "Key-value backend holding the access token and seen-event markers"
    )]
    pub kv_backend: CliKvBackend,

    #[arg(
        long = "kv-path",
        env = "SORTING_HAT_KV_PATH",
        default_value = ".sorting-hat/kv.redb",
        help = "Database file for --kv-backend=redb"
    )]
    pub kv_path: PathBuf,

    #[arg(
        long = "kv-rest-url",
        env = "KV_REST_API_URL",
        help = "REST endpoint for --kv-backend=rest"
    )]
    pub kv_rest_url: Option<String>,

    #[arg(
        long = "kv-rest-token",
        env = "KV_REST_API_TOKEN",
        hide_env_values = true,
        help = "Bearer token for --kv-backend=rest"
    )]
    pub kv_rest_token: Option<String>,
}
