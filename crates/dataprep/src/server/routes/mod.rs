//! API routes for the preprocessing server

pub mod datasets;
pub mod jobs;
pub mod preprocessing;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Datasets - uploads get their own body limit
        .route(
            "/datasets/upload",
            post(datasets::upload_dataset).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/datasets/:id", get(datasets::get_dataset))
        .route("/datasets/export/:id", get(datasets::export_dataset))
        // Preprocessing
        .route("/preprocessing/methods", get(preprocessing::list_methods))
        .route("/preprocessing/preview", post(preprocessing::preview))
        .route("/preprocessing/execute", post(preprocessing::execute))
        .route("/preprocessing/status/:id", get(preprocessing::get_status))
        .route("/preprocessing/data/:id", get(preprocessing::get_data))
        // Job management
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "dataprep",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Tabular preprocessing with locked background jobs and progress polling",
        "endpoints": {
            "POST /api/datasets/upload": "Upload a CSV or Excel file (multipart field 'file')",
            "GET /api/datasets/:id": "Get a dataset's analysis",
            "GET /api/datasets/export/:id": "Download a processed result as CSV",
            "GET /api/preprocessing/methods": "List preprocessing methods and parameters",
            "POST /api/preprocessing/preview": "Run a pipeline on the first rows of a dataset",
            "POST /api/preprocessing/execute": "Queue a pipeline for background execution",
            "GET /api/preprocessing/status/:id": "Poll a job's status",
            "GET /api/preprocessing/data/:id": "First rows of a processed result (?limit=N)",
            "GET /api/jobs": "List jobs and queue stats",
            "GET /api/jobs/:id": "Get a job's record"
        }
    }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::config::PrepConfig;
    use crate::server::{state::AppState, PrepServer};
    use crate::storage::MemoryDocumentStore;

    const BOUNDARY: &str = "dataprep-test-boundary";

    fn router() -> Router {
        router_with(PrepConfig::default())
    }

    fn router_with(mut config: PrepConfig) -> Router {
        config.processing.worker_count = Some(1);
        config.processing.lock_timeout_secs = 1;
        let state = AppState::with_store(config.clone(), Arc::new(MemoryDocumentStore::new()));
        PrepServer::with_state(config, state).build_router()
    }

    fn upload_request(filename: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
             Content-Type: text/csv\r\n\r\n{c}\r\n--{b}--\r\n",
            b = BOUNDARY,
            f = filename,
            c = content
        );
        Request::post("/api/datasets/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(router, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn upload(router: &Router) -> String {
        let (status, body) =
            send_json(router, upload_request("data.csv", "a,b\n1,x\n,y\n3,x\n")).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["dataset_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let router = router();
        let (status, body) = send(&router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");

        let (status, _) = send(&router, get("/ready")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_methods_catalogue() {
        let router = router();
        let (status, body) = send_json(&router, get("/api/preprocessing/methods")).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["method_id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&"missing_values"));
        assert!(ids.contains(&"pca"));
    }

    #[tokio::test]
    async fn test_upload_and_get_dataset() {
        let router = router();
        let dataset_id = upload(&router).await;

        let (status, body) = send_json(&router, get(&format!("/api/datasets/{}", dataset_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["row_count"], 3);
        assert_eq!(body["column_count"], 2);
        assert_eq!(body["columns"][0]["missing_count"], 1);

        let (status, _) = send(&router, get("/api/datasets/unknown")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_rejects_unsupported_file() {
        let router = router();
        let (status, body) = send_json(&router, upload_request("notes.pdf", "hello")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "validation_error");
    }

    #[tokio::test]
    async fn test_upload_over_size_limit() {
        let mut config = PrepConfig::default();
        config.server.max_upload_size = 256;
        let router = router_with(config);

        let content = format!("a,b\n{}", "1,x\n".repeat(200));
        let (status, body) = send_json(&router, upload_request("big.csv", &content)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE, "{}", body);

        let (status, _) = send(&router, upload_request("small.csv", "a,b\n1,x\n")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_execute_rejects_unknown_method() {
        let router = router();
        let dataset_id = upload(&router).await;

        let request = json_request(
            "/api/preprocessing/execute",
            json!({"dataset_id": dataset_id, "methods": [{"method_id": "magic"}]}),
        );
        let (status, body) = send_json(&router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].as_str().unwrap().contains("magic"));

        let (_, jobs) = send_json(&router, get("/api/jobs")).await;
        assert_eq!(jobs["stats"]["total_jobs"], 0);
    }

    #[tokio::test]
    async fn test_preview() {
        let router = router();
        let dataset_id = upload(&router).await;

        let request = json_request(
            "/api/preprocessing/preview",
            json!({
                "dataset_id": dataset_id,
                "methods": [{"method_id": "missing_values", "parameters": {"strategy": "mean"}}]
            }),
        );
        let (status, body) = send_json(&router, request).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert!(body["original_sample"][1]["a"].is_null());
        assert_eq!(body["processed_sample"][1]["a"], 2.0);
        assert_eq!(body["steps"][0]["method_id"], "missing_values");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_execute_poll_and_export() {
        let router = router();
        let dataset_id = upload(&router).await;

        let request = json_request(
            "/api/preprocessing/execute",
            json!({
                "dataset_id": dataset_id,
                "methods": [{"method_id": "missing_values", "parameters": {"strategy": "mean"}}]
            }),
        );
        let (status, body) = send_json(&router, request).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["status"], "processing");
        let result_id = body["result_id"].as_str().unwrap().to_string();

        let status_uri = format!("/api/preprocessing/status/{}", result_id);
        let mut view = Value::Null;
        for _ in 0..100 {
            let (status, body) = send_json(&router, get(&status_uri)).await;
            assert_eq!(status, StatusCode::OK);
            if body["status"] == "completed" || body["status"] == "failed" {
                view = body;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(view["status"], "completed", "{}", view);
        assert_eq!(view["metadata"]["row_count"], 3);

        let (status, data) = send_json(
            &router,
            get(&format!("/api/preprocessing/data/{}?limit=2", result_id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data["total_rows"], 3);
        assert_eq!(data["data"].as_array().unwrap().len(), 2);
        assert_eq!(data["data"][1]["a"], 2.0);

        let response = router
            .clone()
            .oneshot(get(&format!("/api/datasets/export/{}", result_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains(&format!("processed_data_{}.csv", result_id)));
        let csv = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&csv).starts_with("a,b"));

        let (status, job) = send_json(&router, get(&format!("/api/jobs/{}", result_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["status"], "completed");
    }

    #[tokio::test]
    async fn test_unknown_result() {
        let router = router();
        let (status, _) = send(&router, get("/api/preprocessing/status/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&router, get("/api/preprocessing/data/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&router, get("/api/jobs/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
