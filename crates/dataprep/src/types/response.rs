//! API response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ColumnKind;

/// Per-column summary of an uploaded dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Inferred semantic type
    #[serde(rename = "type")]
    pub kind: ColumnKind,
    /// Number of missing cells
    pub missing_count: usize,
    /// Number of distinct present values
    pub unique_count: usize,
    /// Sorted datetime column over more than 10 rows
    pub is_time_series: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_value: Option<f64>,
}

/// Analysis stored alongside an uploaded dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetAnalysis {
    /// Dataset id, also the resource id of its lock
    pub dataset_id: String,
    /// Original file name
    pub filename: String,
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnInfo>,
    /// Method ids worth trying on this dataset
    pub recommended_methods: Vec<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// Response of the execute endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub result_id: String,
    pub status: String,
}

/// First rows of a processed result
#[derive(Debug, Clone, Serialize)]
pub struct DataPreview {
    pub result_id: String,
    pub total_rows: usize,
    pub columns: Vec<String>,
    pub data: Vec<Map<String, Value>>,
}
