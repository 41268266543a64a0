//! Preprocessing method catalogue, preview, execution and result endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::processing::{run_blocking, StatusView, StepReport};
use crate::server::state::AppState;
use crate::transforms::MethodInfo;
use crate::types::{DataPreview, ExecuteResponse, PreprocessingRequest};

/// Default number of rows returned by the data endpoint
const DEFAULT_DATA_LIMIT: usize = 100;

/// Side-by-side sample before and after a pipeline
#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub original_sample: Vec<Map<String, Value>>,
    pub processed_sample: Vec<Map<String, Value>>,
    pub original_columns: Vec<String>,
    pub processed_columns: Vec<String>,
    pub steps: Vec<StepReport>,
}

#[derive(Debug, Deserialize)]
pub struct DataQuery {
    pub limit: Option<usize>,
}

/// GET /api/preprocessing/methods - Available transforms and their parameters
pub async fn list_methods(State(state): State<AppState>) -> Json<Vec<MethodInfo>> {
    Json(state.executor().registry().methods())
}

/// POST /api/preprocessing/preview - Run a pipeline on the first rows of a dataset
pub async fn preview(
    State(state): State<AppState>,
    Json(request): Json<PreprocessingRequest>,
) -> Result<Json<PreviewResponse>> {
    let rows = state.config().dataset.preview_rows;
    let preview = state
        .executor()
        .preview(&request.dataset_id, request.pipeline, rows)
        .await?;

    let processed = &preview.output.table;
    Ok(Json(PreviewResponse {
        original_sample: preview.sample.to_records(rows),
        processed_sample: processed.to_records(rows),
        original_columns: preview.sample.column_names(),
        processed_columns: processed.column_names(),
        steps: preview.output.steps,
    }))
}

/// POST /api/preprocessing/execute - Queue a pipeline for background execution
pub async fn execute(
    State(state): State<AppState>,
    Json(request): Json<PreprocessingRequest>,
) -> Result<Json<ExecuteResponse>> {
    let result_id = state
        .executor()
        .schedule_job(&request.dataset_id, request.pipeline)
        .await
        .map_err(|e| {
            if e.is_contention() {
                tracing::warn!("Execute for dataset {} rejected: {}", request.dataset_id, e);
            }
            e
        })?;

    Ok(Json(ExecuteResponse {
        result_id,
        status: "processing".to_string(),
    }))
}

/// GET /api/preprocessing/status/:id - Poll a job
pub async fn get_status(
    State(state): State<AppState>,
    Path(result_id): Path<String>,
) -> Result<Json<StatusView>> {
    let status = state.status().clone();
    let view = run_blocking(move || status.query_status(&result_id)).await?;
    Ok(Json(view))
}

/// GET /api/preprocessing/data/:id - First rows of a completed result
pub async fn get_data(
    State(state): State<AppState>,
    Path(result_id): Path<String>,
    Query(query): Query<DataQuery>,
) -> Result<Json<DataPreview>> {
    let limit = query.limit.unwrap_or(DEFAULT_DATA_LIMIT);
    let jobs = state.executor().jobs().clone();
    let id = result_id.clone();

    let table = run_blocking(move || jobs.read_result_table(&id))
        .await?
        .ok_or_else(|| Error::not_found(format!("Result {} not found", result_id)))?;

    Ok(Json(DataPreview {
        result_id,
        total_rows: table.row_count(),
        columns: table.column_names(),
        data: table.to_records(limit),
    }))
}
