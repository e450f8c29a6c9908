//! Revisioned document persistence.
//!
//! [`DocumentStore`] models a CouchDB-style database: documents carry a
//! `rev` string (`"<generation>-<nonce>"`) and a write must quote the current
//! rev or fail with [`FleetError::Conflict`]. Two backends ship with the
//! crate: [`InMemoryDocumentStore`] for tests and
//! [`JsonFileDocumentStore`](file::JsonFileDocumentStore) for the CLI.
//!
//! [`DocumentPersister`](persister::DocumentPersister) layers the
//! read-rev-then-write save with bounded retry on top.
//!
//! # Example
//!
//! ```rust
//! # tokio_test::block_on(async {
//! use fleetshare::store::{Document, DocumentStore, InMemoryDocumentStore};
//!
//! let store = InMemoryDocumentStore::new();
//! let rev = store
//!     .put(Document::new("roster", None, serde_json::json!({"devices": []})))
//!     .await
//!     .unwrap();
//! assert!(rev.starts_with("1-"));
//!
//! // Writing without the current rev is a conflict.
//! let stale = store.put(Document::new("roster", None, serde_json::json!({}))).await;
//! assert!(stale.is_err());
//! # });
//! ```

pub mod file;
pub mod persister;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{FleetError, Result};

pub use file::JsonFileDocumentStore;
pub use persister::{DocumentPersister, RetryPolicy};

/// A stored JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Current revision; `None` for a document that was never written.
    pub rev: Option<String>,
    pub body: serde_json::Value,
}

impl Document {
    pub fn new(id: impl Into<String>, rev: Option<String>, body: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            rev,
            body,
        }
    }

    /// Number of successful writes encoded in the revision (0 if unwritten).
    pub fn generation(&self) -> u64 {
        self.rev.as_deref().map(rev_generation).unwrap_or(0)
    }
}

/// Parse the generation prefix of a `"<n>-<nonce>"` revision.
pub(crate) fn rev_generation(rev: &str) -> u64 {
    rev.split_once('-')
        .and_then(|(n, _)| n.parse().ok())
        .unwrap_or(0)
}

/// Build the revision following `previous`.
pub(crate) fn next_rev(previous: Option<&str>) -> String {
    let generation = previous.map(rev_generation).unwrap_or(0) + 1;
    format!("{}-{}", generation, uuid::Uuid::new_v4().simple())
}

/// Check a write's quoted revision against the stored one.
pub(crate) fn check_rev(id: &str, current: Option<&str>, quoted: Option<&str>) -> Result<()> {
    if current == quoted {
        Ok(())
    } else {
        Err(FleetError::Conflict(format!(
            "{}: expected rev {:?}, found {:?}",
            id, quoted, current
        )))
    }
}

/// Document database with optimistic concurrency.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by id.
    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Write `doc`, which must carry the current revision (or `None` for a
    /// new document). Returns the new revision.
    async fn put(&self, doc: Document) -> Result<String>;
}

/// In-memory store. Clone is cheap; clones share the same map.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    docs: Arc<RwLock<HashMap<String, Document>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn put(&self, doc: Document) -> Result<String> {
        let mut docs = self.docs.write().await;
        let current = docs.get(&doc.id).and_then(|d| d.rev.clone());
        check_rev(&doc.id, current.as_deref(), doc.rev.as_deref())?;
        let rev = next_rev(current.as_deref());
        docs.insert(
            doc.id.clone(),
            Document::new(doc.id, Some(rev.clone()), doc.body),
        );
        Ok(rev)
    }
}
