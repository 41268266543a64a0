//! Storage module for datasets, results and job state documents
//!
//! Every document is written with atomic replace so a concurrent reader sees
//! either the previous version or the new one, never a partial write.

mod document_store;
mod fs_store;

pub use document_store::{DocumentKey, DocumentKind, DocumentStore, MemoryDocumentStore};
pub use fs_store::FsDocumentStore;
