use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hat_core::{current_unix_timestamp_ms, is_expired_unix_ms};
use tokio::sync::Mutex;

use crate::{ttl_expiry_unix_ms, KvError, KvStore};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at_ms: Option<u64>,
}

#[derive(Debug, Default)]
/// In-process store. State is lost on restart and is not shared between
/// instances, so it suits tests and single-process deployments.
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) keys.
    pub async fn len(&self) -> usize {
        let now = current_unix_timestamp_ms();
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|entry| !is_expired_unix_ms(entry.expires_at_ms, now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let now = current_unix_timestamp_ms();
        let mut entries = self.entries.lock().await;
        let live = entries.get(key).map(|entry| {
            (!is_expired_unix_ms(entry.expires_at_ms, now)).then(|| entry.value.clone())
        });
        match live {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.entries.lock().await.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at_ms: None,
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        let now = current_unix_timestamp_ms();
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(key) {
            if !is_expired_unix_ms(entry.expires_at_ms, now) {
                return Ok(false);
            }
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at_ms: ttl_expiry_unix_ms(ttl, now),
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::MemoryKvStore;
    use crate::KvStore;

    #[tokio::test]
    async fn unit_memory_store_get_returns_none_for_missing_key() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("absent").await.expect("get"), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn functional_memory_store_set_overwrites_in_place() {
        let store = MemoryKvStore::new();
        store.set("k", "one").await.expect("set");
        store.set("k", "two").await.expect("overwrite");
        assert_eq!(store.get("k").await.expect("get").as_deref(), Some("two"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn functional_set_if_absent_creates_once() {
        let store = MemoryKvStore::new();
        assert!(store.set_if_absent("k", "1", None).await.expect("first"));
        assert!(!store.set_if_absent("k", "2", None).await.expect("second"));
        assert_eq!(store.get("k").await.expect("get").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn functional_set_if_absent_ttl_expires_marker() {
        let store = MemoryKvStore::new();
        assert!(store
            .set_if_absent("k", "1", Some(Duration::from_millis(20)))
            .await
            .expect("first"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.expect("get"), None);
        assert!(store
            .set_if_absent("k", "1", Some(Duration::from_millis(20)))
            .await
            .expect("after expiry"));
    }

    #[tokio::test]
    async fn integration_concurrent_set_if_absent_admits_exactly_one_writer() {
        let store = Arc::new(MemoryKvStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.set_if_absent("race", "1", None).await.expect("set")
            }));
        }
        let mut created = 0;
        for handle in handles {
            if handle.await.expect("join") {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }
}
