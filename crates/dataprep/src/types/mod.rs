//! Core types for tables, pipelines and API responses

pub mod pipeline;
pub mod response;
pub mod table;

pub use pipeline::{PipelineConfig, PreprocessingRequest, TransformStep};
pub use response::{ColumnInfo, DataPreview, DatasetAnalysis, ExecuteResponse};
pub use table::{format_datetime, format_number, parse_datetime, Column, ColumnData, ColumnKind, Table};
