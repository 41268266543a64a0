//! Dataset upload, lookup and export endpoints

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ingestion::{analyze_dataset, LoadOptions};
use crate::processing::run_blocking;
use crate::server::state::AppState;
use crate::storage::DocumentKey;
use crate::types::DatasetAnalysis;

/// File received in an upload
struct Upload {
    filename: String,
    data: Vec<u8>,
}

/// POST /api/datasets/upload - Upload, validate and analyze a dataset
pub async fn upload_dataset(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<DatasetAnalysis>> {
    let mut upload = None;
    let mut options = LoadOptions::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();

        if name == "file" {
            let filename = field
                .file_name()
                .map(|s| s.to_string())
                .ok_or_else(|| Error::validation("Uploaded file has no name"))?;
            let data = field.bytes().await.map_err(multipart_error)?;
            upload = Some(Upload {
                filename,
                data: data.to_vec(),
            });
            continue;
        }

        let value = field.text().await.map_err(multipart_error)?;
        match name.as_str() {
            "encoding" => options.encoding = value,
            "delimiter" => options.delimiter = parse_delimiter(&value)?,
            "has_header" => options.has_header = parse_flag(&value)?,
            other => tracing::debug!("Ignoring upload field '{}'", other),
        }
    }

    let upload = upload.ok_or_else(|| Error::validation("No file provided"))?;
    let dataset_id = Uuid::new_v4().to_string();

    tracing::info!(
        "Received dataset {} ({}, {} bytes)",
        dataset_id,
        upload.filename,
        upload.data.len()
    );

    let worker_state = state.clone();
    let id = dataset_id.clone();
    let analysis = state
        .executor()
        .acquire_and_run(&dataset_id, move || {
            run_blocking(move || ingest(&worker_state, &id, upload, &options))
        })
        .await?;

    tracing::info!(
        "Dataset {} stored: {} rows, {} columns",
        dataset_id,
        analysis.row_count,
        analysis.column_count
    );

    Ok(Json(analysis))
}

/// Parse, store and analyze an upload; runs on a blocking thread
fn ingest(state: &AppState, dataset_id: &str, upload: Upload, options: &LoadOptions) -> Result<DatasetAnalysis> {
    let table = state.loader().load(&upload.filename, &upload.data, options)?;
    let analysis = analyze_dataset(dataset_id, &upload.filename, &table);

    let store = state.store();
    store.put(&DocumentKey::dataset_table(dataset_id)?, &table.to_csv()?)?;
    store.put(
        &DocumentKey::dataset_metadata(dataset_id)?,
        &serde_json::to_vec_pretty(&analysis)?,
    )?;

    Ok(analysis)
}

fn multipart_error(e: MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge(e.body_text())
    } else {
        Error::validation(format!("Failed to read multipart upload: {}", e.body_text()))
    }
}

fn parse_delimiter(value: &str) -> Result<Option<char>> {
    match value {
        "" => Ok(None),
        "\\t" | "tab" => Ok(Some('\t')),
        _ => {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Some(c)),
                _ => Err(Error::validation(format!("Delimiter must be one character, got '{}'", value))),
            }
        }
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::validation(format!("Expected true or false, got '{}'", other))),
    }
}

/// GET /api/datasets/:id - Stored dataset analysis
pub async fn get_dataset(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
) -> Result<Json<DatasetAnalysis>> {
    let store = state.store().clone();
    let key = DocumentKey::dataset_metadata(&dataset_id)?;
    let bytes = run_blocking(move || store.get(&key))
        .await?
        .ok_or_else(|| Error::not_found(format!("Dataset {} not found", dataset_id)))?;
    Ok(Json(serde_json::from_slice(&bytes)?))
}

/// GET /api/datasets/export/:id - Download a processed result as CSV
pub async fn export_dataset(
    State(state): State<AppState>,
    Path(result_id): Path<String>,
) -> Result<impl IntoResponse> {
    let jobs = state.executor().jobs().clone();
    let id = result_id.clone();
    let csv = state
        .executor()
        .acquire_and_run(&result_id, move || run_blocking(move || jobs.read_result_csv(&id)))
        .await?
        .ok_or_else(|| Error::not_found(format!("Result {} not found", result_id)))?;

    let disposition = format!("attachment; filename=\"processed_data_{}.csv\"", result_id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    ))
}
