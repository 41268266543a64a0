//! Job lifecycle state with persisted progress documents
//!
//! Every transition is applied to the in-memory record first and then
//! written to the document store. The persisted documents are what
//! status queries read; the in-memory record is the fallback when a
//! write could not be completed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::pipeline::{PipelineOutput, StepReport};
use crate::error::{Error, Result};
use crate::storage::{DocumentKey, DocumentStore};
use crate::types::{PipelineConfig, Table};

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage label shown while a job runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Loading,
    Preprocessing,
    ProcessingMethod,
    Saving,
    Completed,
    Failed,
}

/// Latest progress of a job, overwritten on every advance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub stage: Stage,
    /// 0 to 100
    pub percent: f32,
    /// Method id of the step being applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    fn new(stage: Stage, percent: f32, current_step: Option<String>) -> Self {
        Self {
            stage,
            percent,
            current_step,
            timestamp: Utc::now(),
        }
    }
}

/// A job and its current state, persisted as the progress document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub result_id: String,
    pub dataset_id: String,
    pub state: JobState,
    pub progress: ProgressSnapshot,
    pub config: PipelineConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata document of a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub result_id: String,
    pub dataset_id: String,
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<String>,
    pub config: PipelineConfig,
    /// Per-step reports including derived parameters
    pub steps: Vec<StepReport>,
    pub completed_at: DateTime<Utc>,
}

impl ResultMetadata {
    pub fn new(result_id: &str, dataset_id: &str, config: &PipelineConfig, output: &PipelineOutput) -> Self {
        Self {
            result_id: result_id.to_string(),
            dataset_id: dataset_id.to_string(),
            row_count: output.table.row_count(),
            column_count: output.table.column_count(),
            columns: output.table.column_names(),
            config: config.clone(),
            steps: output.steps.clone(),
            completed_at: Utc::now(),
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub total_jobs: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Owner of every job's lifecycle state
pub struct JobStateStore {
    jobs: DashMap<String, JobRecord>,
    store: Arc<dyn DocumentStore>,
    persist_retries: u32,
    retry_delay: Duration,
}

impl JobStateStore {
    pub fn new(store: Arc<dyn DocumentStore>, persist_retries: u32, retry_delay: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            store,
            persist_retries,
            retry_delay,
        }
    }

    /// Register a new job in the Queued state
    pub fn create(&self, result_id: &str, dataset_id: &str, config: &PipelineConfig) -> Result<JobRecord> {
        let key = DocumentKey::progress(result_id)?;
        let now = Utc::now();
        let record = JobRecord {
            result_id: result_id.to_string(),
            dataset_id: dataset_id.to_string(),
            state: JobState::Queued,
            progress: ProgressSnapshot::new(Stage::Queued, 0.0, None),
            config: config.clone(),
            error: None,
            created_at: now,
            updated_at: now,
        };

        match self.jobs.entry(result_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                return Err(Error::InvalidTransition {
                    job_id: result_id.to_string(),
                    from: existing.get().state.to_string(),
                    to: JobState::Queued.to_string(),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }

        if let Err(e) = self.persist(&key, &serde_json::to_vec(&record)?) {
            self.jobs.remove(result_id);
            return Err(e);
        }
        Ok(record)
    }

    /// Forget a Queued job that never reached a worker
    pub fn discard(&self, result_id: &str) -> Result<()> {
        let removed = self
            .jobs
            .remove_if(result_id, |_, record| record.state == JobState::Queued);
        if removed.is_some() {
            self.store.delete(&DocumentKey::progress(result_id)?)?;
        }
        Ok(())
    }

    /// Queued -> Running at the loading stage
    pub fn start(&self, result_id: &str) -> Result<()> {
        self.transition(result_id, |record| {
            expect_state(record, &[JobState::Queued], JobState::Running)?;
            record.state = JobState::Running;
            record.progress = ProgressSnapshot::new(Stage::Loading, 5.0, None);
            Ok(())
        })
    }

    /// Record progress of a running job. Percent never moves backwards.
    pub fn advance(&self, result_id: &str, stage: Stage, percent: f32, current_step: Option<String>) -> Result<()> {
        self.transition(result_id, |record| {
            expect_state(record, &[JobState::Running], JobState::Running)?;
            let percent = percent.clamp(0.0, 100.0).max(record.progress.percent);
            record.progress = ProgressSnapshot::new(stage, percent, current_step);
            Ok(())
        })
    }

    /// Write the result table and metadata, then mark the job Completed
    pub fn complete(&self, result_id: &str, table: &Table, metadata: &ResultMetadata) -> Result<()> {
        match self.jobs.get(result_id).map(|r| r.state) {
            Some(JobState::Running) => {}
            Some(state) => {
                return Err(Error::InvalidTransition {
                    job_id: result_id.to_string(),
                    from: state.to_string(),
                    to: JobState::Completed.to_string(),
                })
            }
            None => return Err(Error::not_found(format!("Job {}", result_id))),
        }

        self.persist(&DocumentKey::result_table(result_id)?, &table.to_csv()?)?;
        self.persist(
            &DocumentKey::result_metadata(result_id)?,
            &serde_json::to_vec_pretty(metadata)?,
        )?;

        self.transition(result_id, |record| {
            expect_state(record, &[JobState::Running], JobState::Completed)?;
            record.state = JobState::Completed;
            record.progress = ProgressSnapshot::new(Stage::Completed, 100.0, None);
            Ok(())
        })
    }

    /// Mark a job Failed and write its failure record.
    ///
    /// The in-memory record is switched to Failed before anything is
    /// written, so the job is reported as failed even if every write below
    /// fails. Partial result documents are removed.
    pub fn fail(&self, result_id: &str, message: &str) -> Result<()> {
        let record = {
            let mut record = self
                .jobs
                .get_mut(result_id)
                .ok_or_else(|| Error::not_found(format!("Job {}", result_id)))?;
            expect_state(record.value(), &[JobState::Queued, JobState::Running], JobState::Failed)?;
            let percent = record.progress.percent;
            record.state = JobState::Failed;
            record.error = Some(message.to_string());
            record.progress = ProgressSnapshot::new(Stage::Failed, percent, None);
            record.updated_at = Utc::now();
            record.clone()
        };

        self.persist(&DocumentKey::error(result_id)?, message.as_bytes())?;

        for key in [DocumentKey::result_table(result_id)?, DocumentKey::result_metadata(result_id)?] {
            if let Err(e) = self.store.delete(&key) {
                tracing::warn!("Failed to remove partial result {}: {}", key, e);
            }
        }

        self.persist(&DocumentKey::progress(result_id)?, &serde_json::to_vec(&record)?)
    }

    /// In-memory record of a job
    pub fn get(&self, result_id: &str) -> Option<JobRecord> {
        self.jobs.get(result_id).map(|r| r.clone())
    }

    /// All jobs, oldest first
    pub fn list(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.result_id.cmp(&b.result_id)));
        jobs
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for job in self.jobs.iter() {
            stats.total_jobs += 1;
            match job.state {
                JobState::Queued => stats.queued += 1,
                JobState::Running => stats.running += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Persisted job record, `None` if no progress document exists
    pub fn read_progress(&self, result_id: &str) -> Result<Option<JobRecord>> {
        self.store
            .get(&DocumentKey::progress(result_id)?)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(Error::from))
            .transpose()
    }

    /// Persisted metadata of a completed job
    pub fn read_metadata(&self, result_id: &str) -> Result<Option<ResultMetadata>> {
        self.store
            .get(&DocumentKey::result_metadata(result_id)?)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(Error::from))
            .transpose()
    }

    /// Persisted failure message
    pub fn read_error(&self, result_id: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get(&DocumentKey::error(result_id)?)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Output table of a completed job
    pub fn read_result_table(&self, result_id: &str) -> Result<Option<Table>> {
        self.store
            .get(&DocumentKey::result_table(result_id)?)?
            .map(|bytes| Table::from_csv(&bytes))
            .transpose()
    }

    /// Raw CSV of a completed job
    pub fn read_result_csv(&self, result_id: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(&DocumentKey::result_table(result_id)?)
    }

    /// Apply a change to the in-memory record and persist it
    fn transition<F>(&self, result_id: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut JobRecord) -> Result<()>,
    {
        let record = {
            let mut record = self
                .jobs
                .get_mut(result_id)
                .ok_or_else(|| Error::not_found(format!("Job {}", result_id)))?;
            change(record.value_mut())?;
            record.updated_at = Utc::now();
            record.clone()
        };
        self.persist(&DocumentKey::progress(result_id)?, &serde_json::to_vec(&record)?)
    }

    /// Write a document, retrying storage failures
    fn persist(&self, key: &DocumentKey, contents: &[u8]) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.store.put(key, contents) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.persist_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Failed to persist {} (attempt {}/{}): {}",
                        key,
                        attempt,
                        self.persist_retries + 1,
                        e
                    );
                    std::thread::sleep(self.retry_delay);
                }
                Err(e) => {
                    tracing::error!("Giving up on persisting {}: {}", key, e);
                    return Err(e);
                }
            }
        }
    }
}

fn expect_state(record: &JobRecord, allowed: &[JobState], to: JobState) -> Result<()> {
    if allowed.contains(&record.state) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            job_id: record.result_id.clone(),
            from: record.state.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::{DocumentKind, MemoryDocumentStore};
    use crate::types::{Column, TransformStep};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store whose writes of one kind fail a set number of times
    pub(crate) struct FlakyStore {
        pub inner: MemoryDocumentStore,
        pub kind: DocumentKind,
        pub failures: AtomicUsize,
    }

    impl FlakyStore {
        pub fn new(kind: DocumentKind, failures: usize) -> Self {
            Self {
                inner: MemoryDocumentStore::new(),
                kind,
                failures: AtomicUsize::new(failures),
            }
        }
    }

    impl DocumentStore for FlakyStore {
        fn put(&self, key: &DocumentKey, contents: &[u8]) -> Result<()> {
            if key.kind == self.kind
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(Error::storage("disk full"));
            }
            self.inner.put(key, contents)
        }

        fn get(&self, key: &DocumentKey) -> Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn delete(&self, key: &DocumentKey) -> Result<bool> {
            self.inner.delete(key)
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::new(vec![TransformStep::new("missing_values", serde_json::json!({}))])
    }

    fn output() -> PipelineOutput {
        PipelineOutput {
            table: Table::new(vec![Column::numeric("x", vec![Some(1.0)])]).unwrap(),
            steps: Vec::new(),
        }
    }

    fn states(store: Arc<dyn DocumentStore>) -> JobStateStore {
        JobStateStore::new(store, 2, Duration::from_millis(1))
    }

    #[test]
    fn test_lifecycle_to_completed() {
        let store = Arc::new(MemoryDocumentStore::new());
        let jobs = states(store.clone());

        jobs.create("r1", "d1", &config()).unwrap();
        assert_eq!(jobs.read_progress("r1").unwrap().unwrap().state, JobState::Queued);

        jobs.start("r1").unwrap();
        jobs.advance("r1", Stage::Preprocessing, 20.0, None).unwrap();
        let out = output();
        let metadata = ResultMetadata::new("r1", "d1", &config(), &out);
        jobs.complete("r1", &out.table, &metadata).unwrap();

        let record = jobs.read_progress("r1").unwrap().unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.progress.percent, 100.0);
        assert_eq!(jobs.read_metadata("r1").unwrap().unwrap().row_count, 1);
        assert_eq!(jobs.read_result_table("r1").unwrap().unwrap(), out.table);
        assert_eq!(jobs.stats().completed, 1);
    }

    #[test]
    fn test_percent_never_decreases() {
        let jobs = states(Arc::new(MemoryDocumentStore::new()));
        jobs.create("r1", "d1", &config()).unwrap();
        jobs.start("r1").unwrap();

        jobs.advance("r1", Stage::ProcessingMethod, 55.0, Some("pca".into())).unwrap();
        jobs.advance("r1", Stage::ProcessingMethod, 30.0, Some("lagging".into())).unwrap();

        let progress = jobs.get("r1").unwrap().progress;
        assert_eq!(progress.percent, 55.0);
        assert_eq!(progress.current_step.as_deref(), Some("lagging"));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let jobs = states(Arc::new(MemoryDocumentStore::new()));
        jobs.create("r1", "d1", &config()).unwrap();
        assert!(matches!(jobs.advance("r1", Stage::Saving, 90.0, None), Err(Error::InvalidTransition { .. })));

        jobs.start("r1").unwrap();
        jobs.fail("r1", "Step 0 (missing_values) failed: boom").unwrap();

        let before = jobs.read_progress("r1").unwrap();
        assert!(matches!(jobs.advance("r1", Stage::Saving, 90.0, None), Err(Error::InvalidTransition { .. })));
        assert!(jobs.fail("r1", "again").is_err());
        assert!(jobs.start("r1").is_err());
        assert_eq!(jobs.read_progress("r1").unwrap(), before);
        assert_eq!(jobs.read_error("r1").unwrap().unwrap(), "Step 0 (missing_values) failed: boom");
    }

    #[test]
    fn test_duplicate_create_rejected() {
        let jobs = states(Arc::new(MemoryDocumentStore::new()));
        jobs.create("r1", "d1", &config()).unwrap();
        assert!(matches!(jobs.create("r1", "d1", &config()), Err(Error::InvalidTransition { .. })));
    }

    #[test]
    fn test_persist_retries_then_succeeds() {
        let store = Arc::new(FlakyStore::new(DocumentKind::Progress, 2));
        let jobs = states(store.clone());
        jobs.create("r1", "d1", &config()).unwrap();
        assert!(store.inner.get(&DocumentKey::progress("r1").unwrap()).unwrap().is_some());
    }

    #[test]
    fn test_failed_metadata_write_leaves_no_artifact() {
        let store = Arc::new(FlakyStore::new(DocumentKind::ResultMetadata, 10));
        let jobs = states(store.clone());
        jobs.create("r1", "d1", &config()).unwrap();
        jobs.start("r1").unwrap();

        let out = output();
        let metadata = ResultMetadata::new("r1", "d1", &config(), &out);
        let err = jobs.complete("r1", &out.table, &metadata).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        jobs.fail("r1", &err.to_string()).unwrap();
        assert!(jobs.read_result_table("r1").unwrap().is_none());
        assert!(jobs.read_metadata("r1").unwrap().is_none());
        assert_eq!(jobs.read_progress("r1").unwrap().unwrap().state, JobState::Failed);
    }

    #[test]
    fn test_unwritable_failure_record_still_fails_in_memory() {
        let store = Arc::new(FlakyStore::new(DocumentKind::Error, 10));
        let jobs = states(store);
        jobs.create("r1", "d1", &config()).unwrap();
        jobs.start("r1").unwrap();

        assert!(jobs.fail("r1", "boom").is_err());
        let record = jobs.get("r1").unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_discard_only_queued() {
        let store = Arc::new(MemoryDocumentStore::new());
        let jobs = states(store.clone());
        jobs.create("r1", "d1", &config()).unwrap();
        jobs.discard("r1").unwrap();
        assert!(jobs.get("r1").is_none());
        assert!(jobs.read_progress("r1").unwrap().is_none());

        jobs.create("r2", "d1", &config()).unwrap();
        jobs.start("r2").unwrap();
        jobs.discard("r2").unwrap();
        assert!(jobs.get("r2").is_some());
    }
}
