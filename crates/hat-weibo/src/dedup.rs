//! Idempotency markers that suppress redelivered webhook events.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hat_kv::KvStore;

use crate::WeiboError;

/// Value written under a marker key. Only the key's presence matters.
pub const SEEN_MARKER_VALUE: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Identity of one inbound event for duplicate detection.
pub enum EventKey {
    Status {
        status_id: String,
    },
    Comment {
        comment_id: String,
        status_id: String,
    },
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { status_id } => write!(f, "status:{status_id}"),
            Self::Comment {
                comment_id,
                status_id,
            } => write!(f, "comment:{comment_id}:{status_id}"),
        }
    }
}

impl EventKey {
    fn storage_key(&self) -> String {
        format!("seen:{self}")
    }
}

#[derive(Clone)]
/// First-sighting filter over the shared store.
///
/// The first call for a key marks it and reports `false`; every later call,
/// from this or any other instance sharing the store, reports `true`.
pub struct DeliveryFilter {
    store: Arc<dyn KvStore>,
    marker_ttl: Option<Duration>,
}

impl DeliveryFilter {
    /// `marker_ttl` of `None` keeps markers forever.
    pub fn new(store: Arc<dyn KvStore>, marker_ttl: Option<Duration>) -> Self {
        Self {
            store,
            marker_ttl: marker_ttl.filter(|ttl| !ttl.is_zero()),
        }
    }

    pub async fn is_duplicate(&self, key: &EventKey) -> Result<bool, WeiboError> {
        let created = self
            .store
            .set_if_absent(&key.storage_key(), SEEN_MARKER_VALUE, self.marker_ttl)
            .await?;
        if !created {
            tracing::info!(event = %key, "duplicate delivery suppressed");
        }
        Ok(!created)
    }
}
