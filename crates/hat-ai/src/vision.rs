//! Image description backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::HatAiError;

const DESCRIPTION_FIELDS: [&str; 4] = ["text", "description", "result", "content"];

#[async_trait]
/// Trait contract for `VisionClient` behavior.
pub trait VisionClient: Send + Sync {
    async fn describe_image(&self, image_url: &str) -> Result<String, HatAiError>;
}

#[derive(Debug, Clone)]
/// Public struct `HttpVisionConfig` used across sorting-hat components.
pub struct HttpVisionConfig {
    pub endpoint: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone)]
/// Posts `{"image_url": ...}` to a configured endpoint and reads back a text
/// description.
pub struct HttpVisionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpVisionClient {
    pub fn new(config: HttpVisionConfig) -> Result<Self, HatAiError> {
        let endpoint = config.endpoint.trim().to_string();
        if endpoint.is_empty() {
            return Err(HatAiError::InvalidResponse(
                "vision endpoint is not configured".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl VisionClient for HttpVisionClient {
    async fn describe_image(&self, image_url: &str) -> Result<String, HatAiError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "image_url": image_url }))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(HatAiError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        extract_description(&body)
    }
}

fn extract_description(body: &str) -> Result<String, HatAiError> {
    let description = match serde_json::from_str::<Value>(body) {
        Ok(Value::String(text)) => text,
        Ok(Value::Object(object)) => DESCRIPTION_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| {
                HatAiError::InvalidResponse(
                    "vision response object has no description field".to_string(),
                )
            })?,
        _ => body.to_string(),
    };
    let trimmed = description.trim();
    if trimmed.is_empty() {
        return Err(HatAiError::InvalidResponse(
            "vision response was empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}
