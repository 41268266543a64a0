//! dataprep: Tabular preprocessing service
//!
//! Uploaded CSV and Excel datasets are analyzed and stored; ordered
//! pipelines of transforms (imputation, outlier handling, scaling,
//! encoding, PCA, lag and rolling features) run either as a synchronous
//! preview or as background jobs. Every dataset and result id is guarded
//! by a resource lock, and job progress is persisted so status polls
//! never block behind a running job.

pub mod config;
pub mod error;
pub mod ingestion;
pub mod locking;
pub mod processing;
pub mod server;
pub mod storage;
pub mod transforms;
pub mod types;

pub use config::PrepConfig;
pub use error::{Error, Result};
pub use processing::{JobExecutor, JobState, StatusQueryService, StatusView};
pub use types::{
    pipeline::{PipelineConfig, PreprocessingRequest, TransformStep},
    response::DatasetAnalysis,
    table::{Column, ColumnKind, Table},
};
