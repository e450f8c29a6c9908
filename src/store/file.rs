//! JSON-file document store.
//!
//! One file per document under a data directory (`<dir>/<id>.json`).
//! Writes go through a temp file and a rename so a crash never leaves a
//! half-written document behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{FleetError, Result};

use super::{check_rev, next_rev, Document, DocumentStore};

/// File-backed [`DocumentStore`].
pub struct JsonFileDocumentStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileDocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn doc_path(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(FleetError::Store(format!("invalid document id: {:?}", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    async fn read(&self, path: &Path) -> Result<Option<Document>> {
        match tokio::fs::read_to_string(path).await {
            Ok(data) => {
                let doc = serde_json::from_str(&data).map_err(|e| {
                    FleetError::Store(format!("corrupt document {}: {}", path.display(), e))
                })?;
                Ok(Some(doc))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DocumentStore for JsonFileDocumentStore {
    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let path = self.doc_path(id)?;
        self.read(&path).await
    }

    async fn put(&self, doc: Document) -> Result<String> {
        let path = self.doc_path(&doc.id)?;
        let _guard = self.write_lock.lock().await;

        let current = self.read(&path).await?.and_then(|d| d.rev);
        check_rev(&doc.id, current.as_deref(), doc.rev.as_deref())?;
        let rev = next_rev(current.as_deref());

        let stored = Document::new(doc.id, Some(rev.clone()), doc.body);
        let data = serde_json::to_string_pretty(&stored)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(id = %stored.id, rev = %rev, "Document written");
        Ok(rev)
    }
}
