//! Redis-over-HTTP backend compatible with the Upstash / Vercel KV REST API.

use std::time::Duration;

use async_trait::async_trait;
use hat_core::truncate_for_error;
use serde_json::Value;

use crate::{KvError, KvStore};

#[derive(Debug, Clone)]
/// Public struct `RestKvConfig` used across sorting-hat components.
pub struct RestKvConfig {
    pub url: String,
    pub token: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone)]
/// Sends Redis command arrays (`["SET", key, value]`) to a REST endpoint and
/// reads the `{"result": ...}` envelope.
pub struct RestKvStore {
    http: reqwest::Client,
    url: String,
    token: String,
}

impl RestKvStore {
    pub fn new(config: RestKvConfig) -> Result<Self, KvError> {
        let url = config.url.trim().trim_end_matches('/').to_string();
        if url.is_empty() {
            return Err(KvError::StoreUnavailable(
                "rest kv url is not configured".to_string(),
            ));
        }
        let token = config.token.trim().to_string();
        if token.is_empty() {
            return Err(KvError::StoreUnavailable(
                "rest kv token is not configured".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| {
                KvError::StoreUnavailable(format!("failed to create rest kv client: {error}"))
            })?;
        Ok(Self { http, url, token })
    }

    async fn command(&self, args: &[&str]) -> Result<Value, KvError> {
        let verb = args.first().copied().unwrap_or_default();
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await
            .map_err(|error| {
                KvError::StoreUnavailable(format!("rest kv {verb} request failed: {error}"))
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|error| {
            KvError::StoreUnavailable(format!("rest kv {verb} body read failed: {error}"))
        })?;
        let parsed = serde_json::from_str::<Value>(&body).unwrap_or(Value::Null);
        if let Some(error) = parsed.get("error").and_then(Value::as_str) {
            return Err(KvError::StoreUnavailable(format!(
                "rest kv {verb} failed with status {}: {error}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(KvError::StoreUnavailable(format!(
                "rest kv {verb} failed with status {}: {}",
                status.as_u16(),
                truncate_for_error(&body, 320)
            )));
        }
        match parsed {
            Value::Object(mut object) => Ok(object.remove("result").unwrap_or(Value::Null)),
            _ => Err(KvError::StoreUnavailable(format!(
                "rest kv {verb} returned a non-object body: {}",
                truncate_for_error(&body, 320)
            ))),
        }
    }
}

#[async_trait]
impl KvStore for RestKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        match self.command(&["GET", key]).await? {
            Value::Null => Ok(None),
            Value::String(value) => Ok(Some(value)),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.command(&["SET", key, value]).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        let ttl_secs = ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| ttl.as_secs().max(1).to_string());
        let mut args = vec!["SET", key, value, "NX"];
        if let Some(ttl_secs) = ttl_secs.as_deref() {
            args.push("EX");
            args.push(ttl_secs);
        }
        let result = self.command(&args).await?;
        Ok(!result.is_null())
    }
}
