//! Single-document persistence with bounded retry.
//!
//! [`DocumentPersister::save`] reads the current revision and writes the new
//! body. If that fails, a background task retries with a fixed backoff until
//! the attempt budget is spent, then logs the failure as unrecoverable.
//! Only one retry task exists at a time: a newer save cancels the pending one
//! since its body supersedes the old snapshot. Every save takes a sequence
//! number, and a failed write only retries while no newer save has started.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PersistenceConfig;
use crate::error::Result;

use super::{Document, DocumentStore};

/// Attempt budget and spacing for document writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the immediate one included.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(120),
        }
    }
}

impl From<&PersistenceConfig> for RetryPolicy {
    fn from(cfg: &PersistenceConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            backoff: Duration::from_secs(cfg.backoff_secs),
        }
    }
}

/// Saves and loads one document by id.
pub struct DocumentPersister {
    store: Arc<dyn DocumentStore>,
    doc_id: String,
    policy: RetryPolicy,
    pending: Mutex<Option<CancellationToken>>,
    latest: Arc<AtomicU64>,
}

impl DocumentPersister {
    pub fn new(store: Arc<dyn DocumentStore>, doc_id: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            store,
            doc_id: doc_id.into(),
            policy,
            pending: Mutex::new(None),
            latest: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Load and deserialize the document, or `None` if it was never written.
    pub async fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.store.get(&self.doc_id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc.body)?)),
            None => Ok(None),
        }
    }

    /// Persist `value`. Never fails: errors are retried in the background and
    /// finally logged.
    pub async fn save<T: Serialize>(&self, value: &T) {
        let body = match serde_json::to_value(value) {
            Ok(body) => body,
            Err(e) => {
                error!(doc_id = %self.doc_id, error = %e, "Cannot serialize document, not saved");
                return;
            }
        };

        let seq = {
            let mut slot = self.pending_slot();
            if let Some(token) = slot.take() {
                token.cancel();
            }
            self.latest.fetch_add(1, Ordering::SeqCst) + 1
        };

        match write_once(self.store.as_ref(), &self.doc_id, body.clone()).await {
            Ok(rev) => debug!(doc_id = %self.doc_id, rev = %rev, "Document saved"),
            Err(e) if self.policy.max_attempts <= 1 => {
                error!(doc_id = %self.doc_id, error = %e, "Document save failed, giving up");
            }
            Err(e) => {
                warn!(
                    doc_id = %self.doc_id,
                    error = %e,
                    retry_in_secs = self.policy.backoff.as_secs(),
                    "Document save failed, scheduling retry"
                );
                self.schedule_retry(seq, body);
            }
        }
    }

    /// Cancel a pending retry task, if any.
    pub fn cancel_pending(&self) {
        if let Some(token) = self.pending_slot().take() {
            token.cancel();
        }
    }

    /// `true` while a retry task is waiting or running.
    pub fn has_pending(&self) -> bool {
        self.pending_slot()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    fn pending_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.pending.lock().expect("persister pending lock poisoned")
    }

    /// `true` while no save newer than `seq` has started.
    fn is_latest(&self, seq: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == seq
    }

    fn schedule_retry(&self, seq: u64, body: serde_json::Value) {
        let token = CancellationToken::new();
        {
            let mut slot = self.pending_slot();
            if !self.is_latest(seq) {
                debug!(doc_id = %self.doc_id, seq, "Failed save superseded, not retrying");
                return;
            }
            if let Some(previous) = slot.replace(token.clone()) {
                previous.cancel();
            }
        }

        let store = Arc::clone(&self.store);
        let doc_id = self.doc_id.clone();
        let policy = self.policy;
        let latest = Arc::clone(&self.latest);
        tokio::spawn(async move {
            for attempt in 2..=policy.max_attempts {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(doc_id = %doc_id, "Pending save superseded");
                        return;
                    }
                    _ = tokio::time::sleep(policy.backoff) => {}
                }
                if latest.load(Ordering::SeqCst) != seq {
                    debug!(doc_id = %doc_id, "Pending save superseded");
                    return;
                }
                match write_once(store.as_ref(), &doc_id, body.clone()).await {
                    Ok(rev) => {
                        info!(doc_id = %doc_id, rev = %rev, attempt, "Document saved on retry");
                        token.cancel();
                        return;
                    }
                    Err(e) => {
                        warn!(doc_id = %doc_id, error = %e, attempt, "Document save retry failed");
                    }
                }
            }
            token.cancel();
            error!(
                doc_id = %doc_id,
                attempts = policy.max_attempts,
                "Document save failed permanently; latest changes are not persisted"
            );
        });
    }
}

impl Drop for DocumentPersister {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

/// Read the current revision and write `body` over it.
async fn write_once(store: &dyn DocumentStore, doc_id: &str, body: serde_json::Value) -> Result<String> {
    let rev = store.get(doc_id).await?.and_then(|doc| doc.rev);
    store.put(Document::new(doc_id, rev, body)).await
}
