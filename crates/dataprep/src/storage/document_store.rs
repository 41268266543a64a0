//! Key-value document store abstraction

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// What a stored document holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Uploaded dataset, normalized to CSV
    DatasetTable,
    /// Analysis of an uploaded dataset
    DatasetMetadata,
    /// Output table of a completed job
    ResultTable,
    /// Metadata of a completed job
    ResultMetadata,
    /// Job record with the latest progress snapshot
    Progress,
    /// Failure record of a job
    Error,
}

impl DocumentKind {
    /// File name suffix used by file-backed stores
    pub fn suffix(&self) -> &'static str {
        match self {
            DocumentKind::DatasetTable | DocumentKind::ResultTable => ".csv",
            DocumentKind::DatasetMetadata | DocumentKind::ResultMetadata => "_metadata.json",
            DocumentKind::Progress => "_progress.json",
            DocumentKind::Error => "_error.txt",
        }
    }

    /// Whether the document belongs to an uploaded dataset or a job result
    pub fn is_dataset(&self) -> bool {
        matches!(self, DocumentKind::DatasetTable | DocumentKind::DatasetMetadata)
    }
}

/// Address of one document: resource id plus kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub id: String,
    pub kind: DocumentKind,
}

impl DocumentKey {
    /// Build a key, rejecting ids that are not safe as file names
    pub fn new(id: impl Into<String>, kind: DocumentKind) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self { id, kind })
    }

    pub fn dataset_table(id: &str) -> Result<Self> {
        Self::new(id, DocumentKind::DatasetTable)
    }

    pub fn dataset_metadata(id: &str) -> Result<Self> {
        Self::new(id, DocumentKind::DatasetMetadata)
    }

    pub fn result_table(id: &str) -> Result<Self> {
        Self::new(id, DocumentKind::ResultTable)
    }

    pub fn result_metadata(id: &str) -> Result<Self> {
        Self::new(id, DocumentKind::ResultMetadata)
    }

    pub fn progress(id: &str) -> Result<Self> {
        Self::new(id, DocumentKind::Progress)
    }

    pub fn error(id: &str) -> Result<Self> {
        Self::new(id, DocumentKind::Error)
    }

    /// File name for this document, e.g. `abc_metadata.json`
    pub fn file_name(&self) -> String {
        format!("{}{}", self.id, self.kind.suffix())
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.id)
    }
}

/// Resource ids double as file names: allow `[A-Za-z0-9_-]` only
fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(Error::validation(format!("Invalid resource id length: {}", id.len())));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::validation(format!("Invalid resource id: '{}'", id)));
    }
    Ok(())
}

/// Storage for tables and state documents.
///
/// Implementations must make `put` atomic: a concurrent `get` returns the
/// old contents or the new contents, never a mix.
///
/// Implementations:
/// - `FsDocumentStore`: files under a data directory, temp file + rename
/// - `MemoryDocumentStore`: in-process map, for tests and previews
pub trait DocumentStore: Send + Sync {
    /// Atomically create or replace a document
    fn put(&self, key: &DocumentKey, contents: &[u8]) -> Result<()>;

    /// Read a document, `None` if it does not exist
    fn get(&self, key: &DocumentKey) -> Result<Option<Vec<u8>>>;

    /// Remove a document, returning whether it existed
    fn delete(&self, key: &DocumentKey) -> Result<bool>;

    /// Check if a document exists
    fn contains(&self, key: &DocumentKey) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Get store name for logging
    fn name(&self) -> &str;
}

/// In-memory document store
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<DocumentKey, Vec<u8>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn put(&self, key: &DocumentKey, contents: &[u8]) -> Result<()> {
        self.documents.insert(key.clone(), contents.to_vec());
        Ok(())
    }

    fn get(&self, key: &DocumentKey) -> Result<Option<Vec<u8>>> {
        Ok(self.documents.get(key).map(|d| d.value().clone()))
    }

    fn delete(&self, key: &DocumentKey) -> Result<bool> {
        Ok(self.documents.remove(key).is_some())
    }

    fn contains(&self, key: &DocumentKey) -> Result<bool> {
        Ok(self.documents.contains_key(key))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_file_names() {
        let key = DocumentKey::result_metadata("abc-123").unwrap();
        assert_eq!(key.file_name(), "abc-123_metadata.json");
        assert_eq!(DocumentKey::progress("j1").unwrap().file_name(), "j1_progress.json");
        assert_eq!(DocumentKey::error("j1").unwrap().file_name(), "j1_error.txt");
        assert!(DocumentKind::DatasetTable.is_dataset());
        assert!(!DocumentKind::ResultTable.is_dataset());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        assert!(DocumentKey::dataset_table("../etc/passwd").is_err());
        assert!(DocumentKey::dataset_table("a/b").is_err());
        assert!(DocumentKey::dataset_table("").is_err());
        assert!(DocumentKey::dataset_table("0f8fad5b-d9cb-469f-a165-70867728950e").is_ok());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryDocumentStore::new();
        let key = DocumentKey::error("job").unwrap();

        assert!(!store.contains(&key).unwrap());
        store.put(&key, b"boom").unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some(&b"boom"[..]));
        assert!(store.delete(&key).unwrap());
        assert!(store.get(&key).unwrap().is_none());
        assert!(store.is_empty());
    }
}
