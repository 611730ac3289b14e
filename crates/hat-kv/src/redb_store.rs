//! Durable single-file backend built on redb.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hat_core::{current_unix_timestamp_ms, is_expired_unix_ms};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{ttl_expiry_unix_ms, KvError, KvStore};

const KV_TABLE: TableDefinition<&str, &str> = TableDefinition::new("kv");

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    #[serde(default)]
    expires_at_ms: Option<u64>,
}

impl StoredEntry {
    fn live_value(self, now_unix_ms: u64) -> Option<String> {
        if is_expired_unix_ms(self.expires_at_ms, now_unix_ms) {
            None
        } else {
            Some(self.value)
        }
    }
}

#[derive(Clone)]
/// Persists entries in a local redb file so markers and the cached token
/// survive restarts of a single instance.
pub struct RedbKvStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbKvStore")
            .field("path", &self.path)
            .finish()
    }
}

impl RedbKvStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, KvError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|error| {
                KvError::StoreUnavailable(format!(
                    "failed to create {}: {error}",
                    parent.display()
                ))
            })?;
        }
        let db = Database::create(&path).map_err(|error| {
            KvError::StoreUnavailable(format!("failed to open {}: {error}", path.display()))
        })?;

        let txn = db.begin_write().map_err(backend_error)?;
        {
            txn.open_table(KV_TABLE).map_err(backend_error)?;
        }
        txn.commit().map_err(backend_error)?;

        tracing::debug!(path = %path.display(), "opened redb key-value store");
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    async fn run_blocking<T, F>(&self, operation: F) -> Result<T, KvError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, KvError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || operation(&db))
            .await
            .map_err(|error| KvError::StoreUnavailable(format!("redb task failed: {error}")))?
    }
}

fn backend_error(error: impl std::fmt::Display) -> KvError {
    KvError::StoreUnavailable(format!("redb: {error}"))
}

fn decode_entry(key: &str, raw: &str) -> Result<StoredEntry, KvError> {
    serde_json::from_str::<StoredEntry>(raw).map_err(|source| KvError::Serialization {
        key: key.to_string(),
        source,
    })
}

fn encode_entry(key: &str, entry: &StoredEntry) -> Result<String, KvError> {
    serde_json::to_string(entry).map_err(|source| KvError::Serialization {
        key: key.to_string(),
        source,
    })
}

#[async_trait]
impl KvStore for RedbKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let key = key.to_string();
        self.run_blocking(move |db| {
            let txn = db.begin_read().map_err(backend_error)?;
            let table = txn.open_table(KV_TABLE).map_err(backend_error)?;
            let raw = table
                .get(key.as_str())
                .map_err(backend_error)?
                .map(|guard| guard.value().to_string());
            match raw {
                Some(raw) => Ok(decode_entry(&key, &raw)?.live_value(current_unix_timestamp_ms())),
                None => Ok(None),
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let key = key.to_string();
        let encoded = encode_entry(
            &key,
            &StoredEntry {
                value: value.to_string(),
                expires_at_ms: None,
            },
        )?;
        self.run_blocking(move |db| {
            let txn = db.begin_write().map_err(backend_error)?;
            {
                let mut table = txn.open_table(KV_TABLE).map_err(backend_error)?;
                table
                    .insert(key.as_str(), encoded.as_str())
                    .map_err(backend_error)?;
            }
            txn.commit().map_err(backend_error)
        })
        .await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        let key = key.to_string();
        let value = value.to_string();
        // redb serializes write transactions, so the check and the insert
        // below cannot interleave with another writer.
        self.run_blocking(move |db| {
            let now = current_unix_timestamp_ms();
            let txn = db.begin_write().map_err(backend_error)?;
            let created = {
                let mut table = txn.open_table(KV_TABLE).map_err(backend_error)?;
                let existing = table
                    .get(key.as_str())
                    .map_err(backend_error)?
                    .map(|guard| guard.value().to_string());
                let occupied = match existing {
                    Some(raw) => decode_entry(&key, &raw)?.live_value(now).is_some(),
                    None => false,
                };
                if occupied {
                    false
                } else {
                    let encoded = encode_entry(
                        &key,
                        &StoredEntry {
                            value,
                            expires_at_ms: ttl_expiry_unix_ms(ttl, now),
                        },
                    )?;
                    table
                        .insert(key.as_str(), encoded.as_str())
                        .map_err(backend_error)?;
                    true
                }
            };
            txn.commit().map_err(backend_error)?;
            Ok(created)
        })
        .await
    }
}
