use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::retry::{
    is_retryable_http_error, new_request_id, parse_retry_after_ms, should_retry_status,
    RetryPolicy,
};
use crate::{ChatRequest, ChatResponse, ChatUsage, HatAiError, LlmClient, Message};

#[derive(Debug, Clone)]
/// Public struct `OpenAiConfig` used across sorting-hat components.
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_budget_ms: u64,
}

#[derive(Debug, Clone)]
/// Chat-completion client for any OpenAI-compatible endpoint.
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionEnvelope {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, HatAiError> {
        if config.api_key.trim().is_empty() {
            return Err(HatAiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|e| {
                HatAiError::InvalidResponse(format!("invalid API key header: {e}"))
            })?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }
        format!("{base}/chat/completions")
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.max_retries,
            budget_ms: self.config.retry_budget_ms,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, HatAiError> {
        let body = build_chat_request_body(&request);
        let url = self.chat_completions_url();
        let policy = self.retry_policy();
        let started = Instant::now();
        let mut attempt = 0_usize;

        loop {
            let response = self
                .client
                .post(&url)
                .header("x-hat-request-id", new_request_id())
                .header("x-hat-retry-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        return parse_chat_response(&raw);
                    }
                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await.unwrap_or_default();
                    if should_retry_status(status.as_u16()) {
                        if let Some(delay) = policy.delay_for(attempt, elapsed_ms, retry_after_ms)
                        {
                            tracing::debug!(
                                status = status.as_u16(),
                                attempt,
                                "chat completion retrying after status"
                            );
                            sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                    }
                    return Err(HatAiError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if is_retryable_http_error(&error) {
                        if let Some(delay) = policy.delay_for(attempt, elapsed_ms, None) {
                            tracing::debug!(%error, attempt, "chat completion retrying after transport error");
                            sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                    }
                    return Err(HatAiError::Http(error));
                }
            }
        }
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": request
            .messages
            .iter()
            .map(|message| json!({"role": message.role, "content": message.content}))
            .collect::<Vec<_>>(),
        "stream": false,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

fn parse_chat_response(raw: &str) -> Result<ChatResponse, HatAiError> {
    let parsed: ChatCompletionEnvelope = serde_json::from_str(raw)?;
    let choice = parsed.choices.into_iter().next().ok_or_else(|| {
        HatAiError::InvalidResponse("response contained no choices".to_string())
    })?;
    let content = choice
        .message
        .content
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| HatAiError::InvalidResponse("response contained no text".to_string()))?;

    let usage = parsed
        .usage
        .map(|usage| ChatUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        message: Message::assistant(content),
        finish_reason: choice.finish_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_chat_request_body, parse_chat_response};
    use crate::{ChatRequest, HatAiError, Message};

    #[test]
    fn unit_request_body_carries_model_messages_and_sampling() {
        let body = build_chat_request_body(&ChatRequest {
            model: "deepseek-chat".to_string(),
            messages: vec![Message::system("sys"), Message::user("你是谁")],
            max_tokens: Some(4096),
            temperature: Some(0.5),
        });
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "sys"}));
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn unit_request_body_omits_unset_sampling_fields() {
        let body = build_chat_request_body(&ChatRequest {
            model: "m".to_string(),
            messages: vec![Message::user("hi")],
            max_tokens: None,
            temperature: None,
        });
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn regression_parse_rejects_empty_choices_and_blank_content() {
        let error = parse_chat_response(r#"{"choices": []}"#).expect_err("no choices");
        assert!(matches!(error, HatAiError::InvalidResponse(_)));

        let error = parse_chat_response(r#"{"choices": [{"message": {"content": null}}]}"#)
            .expect_err("null content");
        assert!(matches!(error, HatAiError::InvalidResponse(_)));
    }
}
