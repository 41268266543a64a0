//! Filesystem-backed document store
//!
//! Layout under the data directory:
//! - `uploads/{id}.csv`, `uploads/{id}_metadata.json` for datasets
//! - `processed/{id}.csv`, `processed/{id}_metadata.json`,
//!   `processed/{id}_progress.json`, `processed/{id}_error.txt` for jobs

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{DocumentKey, DocumentStore};
use crate::error::{Error, Result};

/// Document store rooted at a data directory
pub struct FsDocumentStore {
    uploads_dir: PathBuf,
    processed_dir: PathBuf,
}

impl FsDocumentStore {
    /// Create the store, creating its directories if needed
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let uploads_dir = data_dir.join("uploads");
        let processed_dir = data_dir.join("processed");

        for dir in [&uploads_dir, &processed_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                Error::storage(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        tracing::info!("Document store initialized at {}", data_dir.display());

        Ok(Self {
            uploads_dir,
            processed_dir,
        })
    }

    /// Full path of a document
    pub fn path_for(&self, key: &DocumentKey) -> PathBuf {
        let dir = if key.kind.is_dataset() {
            &self.uploads_dir
        } else {
            &self.processed_dir
        };
        dir.join(key.file_name())
    }
}

impl DocumentStore for FsDocumentStore {
    fn put(&self, key: &DocumentKey, contents: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let dir = path
            .parent()
            .ok_or_else(|| Error::storage(format!("No parent directory for {}", path.display())))?;

        // Temp file in the same directory so the rename never crosses filesystems
        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| Error::storage(format!("Failed to create temp file for {}: {}", key, e)))?;
        tmp.write_all(contents)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| Error::storage(format!("Failed to write {}: {}", key, e)))?;
        tmp.persist(&path)
            .map_err(|e| Error::storage(format!("Failed to replace {}: {}", path.display(), e.error)))?;

        Ok(())
    }

    fn get(&self, key: &DocumentKey) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(format!("Failed to read {}: {}", key, e))),
        }
    }

    fn delete(&self, key: &DocumentKey) -> Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage(format!("Failed to delete {}: {}", key, e))),
        }
    }

    fn contains(&self, key: &DocumentKey) -> Result<bool> {
        Ok(self.path_for(key).exists())
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_layout_and_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path()).unwrap();

        let dataset = DocumentKey::dataset_table("d1").unwrap();
        let progress = DocumentKey::progress("r1").unwrap();
        store.put(&dataset, b"x\n1\n").unwrap();
        store.put(&progress, b"{}").unwrap();

        assert!(dir.path().join("uploads/d1.csv").exists());
        assert!(dir.path().join("processed/r1_progress.json").exists());
        assert_eq!(store.get(&dataset).unwrap().unwrap(), b"x\n1\n");
        assert!(store.contains(&progress).unwrap());

        assert!(store.delete(&progress).unwrap());
        assert!(!store.delete(&progress).unwrap());
        assert!(store.get(&progress).unwrap().is_none());
    }

    #[test]
    fn test_replace_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path()).unwrap();
        let key = DocumentKey::progress("r1").unwrap();

        for i in 0..5 {
            store.put(&key, format!("{{\"n\":{}}}", i).as_bytes()).unwrap();
        }

        assert_eq!(store.get(&key).unwrap().unwrap(), b"{\"n\":4}");
        let entries = fs::read_dir(dir.path().join("processed")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_concurrent_reader_never_sees_partial_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsDocumentStore::new(dir.path()).unwrap());
        let key = DocumentKey::progress("r1").unwrap();
        let small = vec![b'a'; 16];
        let large = vec![b'b'; 256 * 1024];
        store.put(&key, &small).unwrap();

        let writer = {
            let store = store.clone();
            let key = key.clone();
            let (small, large) = (small.clone(), large.clone());
            std::thread::spawn(move || {
                for i in 0..50 {
                    let contents = if i % 2 == 0 { &large } else { &small };
                    store.put(&key, contents).unwrap();
                }
            })
        };

        for _ in 0..200 {
            let contents = store.get(&key).unwrap().unwrap();
            assert!(contents == small || contents == large, "torn read of {} bytes", contents.len());
        }

        writer.join().unwrap();
    }
}
