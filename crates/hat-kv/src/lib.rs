//! Key-value persistence for sorting-hat.
//!
//! Every piece of durable state (the cached platform access token and the
//! duplicate-delivery markers) lives behind [`KvStore`]. Callers never cache
//! values client-side; each check re-queries the store so several service
//! instances sharing one backend observe the same state.

mod memory;
mod redb_store;
mod rest;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryKvStore;
pub use redb_store::RedbKvStore;
pub use rest::{RestKvConfig, RestKvStore};

#[derive(Debug, Error)]
/// Enumerates supported `KvError` values.
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("malformed record for key '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
/// Trait contract for `KvStore` behavior.
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Writes `value`, replacing any previous value and clearing its expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Creates `key` only when it is absent. Returns `true` when this call
    /// created it.
    ///
    /// The default is a plain read-then-write and is not atomic; backends
    /// override it with their native primitive.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        let _ = ttl;
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.set(key, value).await?;
        Ok(true)
    }
}

/// Reads and decodes a structured record stored as JSON.
pub async fn get_json<T>(store: &dyn KvStore, key: &str) -> Result<Option<T>, KvError>
where
    T: DeserializeOwned,
{
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_str::<T>(&raw)
        .map(Some)
        .map_err(|source| KvError::Serialization {
            key: key.to_string(),
            source,
        })
}

/// Encodes a structured record as JSON and stores it.
pub async fn set_json<T>(store: &dyn KvStore, key: &str, value: &T) -> Result<(), KvError>
where
    T: Serialize + Sync,
{
    let raw = serde_json::to_string(value).map_err(|source| KvError::Serialization {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw).await
}

fn ttl_expiry_unix_ms(ttl: Option<Duration>, now_unix_ms: u64) -> Option<u64> {
    ttl.filter(|ttl| !ttl.is_zero()).map(|ttl| {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        now_unix_ms.saturating_add(ttl_ms)
    })
}
