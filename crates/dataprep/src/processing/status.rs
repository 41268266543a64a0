//! Read-only job status queries

use serde::Serialize;
use std::sync::Arc;

use super::job_state::{JobRecord, JobState, JobStateStore, ProgressSnapshot, ResultMetadata};
use crate::error::{Error, Result};
use crate::locking::ResourceLockRegistry;

/// Answer to a status poll
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub result_id: String,
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusView {
    fn new(result_id: &str, status: JobState) -> Self {
        Self {
            result_id: result_id.to_string(),
            status,
            progress: None,
            metadata: None,
            error_message: None,
        }
    }

    fn from_record(record: JobRecord) -> Self {
        let mut view = Self::new(&record.result_id, record.state);
        match record.state {
            JobState::Running => view.progress = Some(record.progress),
            JobState::Failed => view.error_message = record.error,
            JobState::Queued | JobState::Completed => {}
        }
        view
    }
}

/// Status lookups over persisted job documents.
///
/// While a job holds its result id's lock the persisted progress snapshot
/// is reported on a best-effort basis. Otherwise a failure record wins
/// over completed metadata, which wins over a queued record.
#[derive(Clone)]
pub struct StatusQueryService {
    locks: ResourceLockRegistry,
    jobs: Arc<JobStateStore>,
}

impl StatusQueryService {
    pub fn new(locks: ResourceLockRegistry, jobs: Arc<JobStateStore>) -> Self {
        Self { locks, jobs }
    }

    pub fn query_status(&self, result_id: &str) -> Result<StatusView> {
        if self.locks.is_busy(result_id) {
            if let Some(view) = self.running_view(result_id) {
                return Ok(view);
            }
        }

        if let Some(message) = self.jobs.read_error(result_id)? {
            let mut view = StatusView::new(result_id, JobState::Failed);
            view.error_message = Some(message);
            return Ok(view);
        }

        // A failure whose record could not be written
        let in_memory = self.jobs.get(result_id);
        if let Some(record) = in_memory.as_ref().filter(|r| r.state == JobState::Failed) {
            return Ok(StatusView::from_record(record.clone()));
        }

        if let Some(metadata) = self.jobs.read_metadata(result_id)? {
            let mut view = StatusView::new(result_id, JobState::Completed);
            view.metadata = Some(metadata);
            return Ok(view);
        }

        if let Some(record) = self.jobs.read_progress(result_id)? {
            return Ok(StatusView::from_record(record));
        }

        in_memory
            .map(StatusView::from_record)
            .ok_or_else(|| Error::not_found(format!("Result {}", result_id)))
    }

    /// View for a locked result id, `None` when the lock is held by
    /// something other than a running job
    fn running_view(&self, result_id: &str) -> Option<StatusView> {
        let persisted = self.jobs.read_progress(result_id).unwrap_or_else(|e| {
            tracing::debug!("Unreadable progress for {}: {}", result_id, e);
            None
        });
        if let Some(record) = persisted.filter(|r| r.state == JobState::Running) {
            let mut view = StatusView::new(result_id, JobState::Running);
            view.progress = Some(record.progress);
            return Some(view);
        }

        // Progress document missing, unreadable or behind the live record
        self.jobs
            .get(result_id)
            .filter(|r| r.state == JobState::Running)
            .map(|_| StatusView::new(result_id, JobState::Running))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::job_state::tests::FlakyStore;
    use crate::processing::job_state::Stage;
    use crate::processing::PipelineOutput;
    use crate::storage::{DocumentKey, DocumentKind, DocumentStore, MemoryDocumentStore};
    use crate::types::{Column, PipelineConfig, Table, TransformStep};
    use std::time::Duration;

    fn setup(store: Arc<dyn DocumentStore>) -> (StatusQueryService, Arc<JobStateStore>, ResourceLockRegistry) {
        let locks = ResourceLockRegistry::new();
        let jobs = Arc::new(JobStateStore::new(store, 0, Duration::ZERO));
        (StatusQueryService::new(locks.clone(), jobs.clone()), jobs, locks)
    }

    fn config() -> PipelineConfig {
        PipelineConfig::new(vec![TransformStep::new("missing_values", serde_json::json!({}))])
    }

    #[tokio::test]
    async fn test_busy_reports_progress() {
        let (status, jobs, locks) = setup(Arc::new(MemoryDocumentStore::new()));
        jobs.create("r1", "d1", &config()).unwrap();
        let _guard = locks.acquire("r1", Duration::ZERO).await.unwrap();
        jobs.start("r1").unwrap();
        jobs.advance("r1", Stage::ProcessingMethod, 20.0, Some("missing_values".into()))
            .unwrap();

        let view = status.query_status("r1").unwrap();
        assert_eq!(view.status, JobState::Running);
        let progress = view.progress.unwrap();
        assert_eq!(progress.stage, Stage::ProcessingMethod);
        assert_eq!(progress.current_step.as_deref(), Some("missing_values"));
    }

    #[tokio::test]
    async fn test_busy_with_unreadable_progress() {
        let store = Arc::new(MemoryDocumentStore::new());
        let (status, jobs, locks) = setup(store.clone());
        jobs.create("r1", "d1", &config()).unwrap();
        let _guard = locks.acquire("r1", Duration::ZERO).await.unwrap();
        jobs.start("r1").unwrap();
        store
            .put(&DocumentKey::progress("r1").unwrap(), b"{\"state\": \"runn")
            .unwrap();

        let view = status.query_status("r1").unwrap();
        assert_eq!(view.status, JobState::Running);
        assert!(view.progress.is_none());
    }

    #[tokio::test]
    async fn test_lock_held_by_other_operation() {
        let (status, jobs, locks) = setup(Arc::new(MemoryDocumentStore::new()));
        jobs.create("r1", "d1", &config()).unwrap();
        let _queued = locks.acquire("r1", Duration::ZERO).await.unwrap();
        let _unknown = locks.acquire("r2", Duration::ZERO).await.unwrap();

        let view = status.query_status("r1").unwrap();
        assert_eq!(view.status, JobState::Queued);
        assert!(view.progress.is_none());

        assert!(matches!(status.query_status("r2"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_failure_wins_over_metadata() {
        let store = Arc::new(MemoryDocumentStore::new());
        let (status, jobs, _locks) = setup(store.clone());
        jobs.create("r1", "d1", &config()).unwrap();
        jobs.start("r1").unwrap();
        let output = PipelineOutput {
            table: Table::new(vec![Column::numeric("x", vec![Some(1.0)])]).unwrap(),
            steps: Vec::new(),
        };
        let metadata = ResultMetadata::new("r1", "d1", &config(), &output);
        jobs.complete("r1", &output.table, &metadata).unwrap();

        let view = status.query_status("r1").unwrap();
        assert_eq!(view.status, JobState::Completed);
        assert_eq!(view.metadata.unwrap().row_count, 1);

        store
            .put(&DocumentKey::error("r1").unwrap(), b"Step 0 (pca) failed: too few rows")
            .unwrap();
        let view = status.query_status("r1").unwrap();
        assert_eq!(view.status, JobState::Failed);
        assert!(view.metadata.is_none());
        assert_eq!(view.error_message.as_deref(), Some("Step 0 (pca) failed: too few rows"));
    }

    #[test]
    fn test_queued_and_unknown() {
        let (status, jobs, _locks) = setup(Arc::new(MemoryDocumentStore::new()));
        jobs.create("r1", "d1", &config()).unwrap();

        let view = status.query_status("r1").unwrap();
        assert_eq!(view.status, JobState::Queued);
        assert!(view.progress.is_none());

        assert!(matches!(status.query_status("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_unwritten_failure_reported_from_memory() {
        let store: Arc<dyn DocumentStore> = Arc::new(FlakyStore::new(DocumentKind::Error, 10));
        let (status, jobs, _locks) = setup(store);
        jobs.create("r1", "d1", &config()).unwrap();
        jobs.start("r1").unwrap();
        assert!(jobs.fail("r1", "disk gone").is_err());

        let view = status.query_status("r1").unwrap();
        assert_eq!(view.status, JobState::Failed);
        assert_eq!(view.error_message.as_deref(), Some("disk gone"));
    }
}
