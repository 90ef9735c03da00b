//! One JSON file per document.
//!
//! File names are the SHA-256 of the document id, so arbitrary ids map to
//! safe paths. Writes go through a temp file and a rename.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::record::StoredDocument;

pub(crate) struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// Open the store, creating `root` if needed.
    pub(crate) async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::CreateDirectory(format!("{}: {e}", root.display())))?;
        Ok(Self { root })
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, doc_id: &str) -> PathBuf {
        let digest = Sha256::digest(doc_id.as_bytes());
        self.root.join(format!("{digest:x}.json"))
    }

    /// Load every document file. Unreadable files are skipped with a warning;
    /// leftover temp files are removed.
    pub(crate) async fn load_all(&self) -> Result<Vec<StoredDocument>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::ReadFile(format!("{}: {e}", self.root.display())))?;

        let mut documents = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::ReadFile(format!("{e}")))?
        {
            let path = entry.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => match Self::load_file(&path).await {
                    Ok(stored) => {
                        debug!(doc_id = %stored.document.doc_id, "loaded document");
                        documents.push(stored);
                    }
                    Err(e) => warn!("Failed to load document file {}: {e}", path.display()),
                },
                Some("tmp") => {
                    if let Err(e) = fs::remove_file(&path).await {
                        warn!("Failed to remove stale temp file {}: {e}", path.display());
                    }
                }
                _ => {}
            }
        }

        info!("Loaded {} documents from {}", documents.len(), self.root.display());
        Ok(documents)
    }

    async fn load_file(path: &Path) -> Result<StoredDocument> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StorageError::ReadFile(format!("{}: {e}", path.display())))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub(crate) async fn write(&self, stored: &StoredDocument) -> Result<()> {
        let path = self.document_path(&stored.document.doc_id);
        let content = serde_json::to_string(stored)?;

        let temp_path = path.with_extension("json.tmp");
        if let Err(e) = fs::write(&temp_path, &content).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::WriteFile(format!("{}: {e}", temp_path.display())).into());
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::WriteFile(format!("{}: {e}", path.display())).into());
        }

        debug!(doc_id = %stored.document.doc_id, "saved document");
        Ok(())
    }

    /// Remove a document file; a missing file is not an error.
    pub(crate) async fn remove(&self, doc_id: &str) -> Result<()> {
        let path = self.document_path(doc_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFile(format!("{}: {e}", path.display())).into()),
        }
    }
}
