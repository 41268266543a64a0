//! Locked execution and background scheduling of preprocessing jobs

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::job_state::{JobStateStore, ResultMetadata, Stage};
use super::pipeline::{PipelineOutput, TransformPipeline};
use super::worker::ProcessingWorker;
use crate::config::ProcessingConfig;
use crate::error::{Error, Result};
use crate::locking::ResourceLockRegistry;
use crate::storage::{DocumentKey, DocumentStore};
use crate::transforms::TransformRegistry;
use crate::types::{PipelineConfig, Table};

/// A job waiting for a worker
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub result_id: String,
    pub dataset_id: String,
    pub config: PipelineConfig,
}

/// Receiving half of the job queue, shared by all workers
pub type JobReceiver = mpsc::Receiver<QueuedJob>;

/// Pipeline output on a sample of a dataset
#[derive(Debug, Clone)]
pub struct PreviewOutput {
    /// Input rows the pipeline ran on
    pub sample: Table,
    pub output: PipelineOutput,
}

/// Runs operations under resource locks and drives job state transitions
#[derive(Clone)]
pub struct JobExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    locks: ResourceLockRegistry,
    jobs: Arc<JobStateStore>,
    store: Arc<dyn DocumentStore>,
    pipeline: TransformPipeline,
    sender: mpsc::Sender<QueuedJob>,
    queue_capacity: usize,
    lock_timeout: Duration,
}

impl JobExecutor {
    /// Create the executor and the receiving end of its bounded job queue
    pub fn new(
        locks: ResourceLockRegistry,
        store: Arc<dyn DocumentStore>,
        registry: Arc<TransformRegistry>,
        config: &ProcessingConfig,
    ) -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let jobs = Arc::new(JobStateStore::new(
            store.clone(),
            config.persist_retries,
            config.persist_retry_delay(),
        ));

        let executor = Self {
            inner: Arc::new(ExecutorInner {
                locks,
                jobs,
                store,
                pipeline: TransformPipeline::new(registry),
                sender,
                queue_capacity: config.queue_capacity,
                lock_timeout: config.lock_timeout(),
            }),
        };

        (executor, receiver)
    }

    /// Spawn `count` workers sharing one queue
    pub fn start_workers(&self, receiver: JobReceiver, count: usize) -> Vec<JoinHandle<()>> {
        let receiver = Arc::new(Mutex::new(receiver));
        (0..count.max(1))
            .map(|id| {
                let worker = ProcessingWorker::new(id, self.clone());
                tokio::spawn(worker.run(receiver.clone()))
            })
            .collect()
    }

    pub fn locks(&self) -> &ResourceLockRegistry {
        &self.inner.locks
    }

    pub fn jobs(&self) -> &Arc<JobStateStore> {
        &self.inner.jobs
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    pub fn registry(&self) -> &TransformRegistry {
        self.inner.pipeline.registry()
    }

    /// Run `operation` with exclusive access to `resource_id`, waiting up to
    /// the configured lock timeout
    pub async fn acquire_and_run<F, Fut, T>(&self, resource_id: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.inner
            .locks
            .run_exclusive(resource_id, self.inner.lock_timeout, operation)
            .await
    }

    /// Whether a locked operation is running on `resource_id`
    pub fn is_busy(&self, resource_id: &str) -> bool {
        self.inner.locks.is_busy(resource_id)
    }

    /// Read a stored dataset
    pub fn load_dataset(&self, dataset_id: &str) -> Result<Table> {
        let bytes = self
            .inner
            .store
            .get(&DocumentKey::dataset_table(dataset_id)?)?
            .ok_or_else(|| Error::not_found(format!("Dataset {}", dataset_id)))?;
        Table::from_csv(&bytes)
    }

    /// Accept a pipeline for background execution and return its result id.
    ///
    /// The config is validated and the dataset checked under the dataset's
    /// lock; the job is queued after that lock is released. Returns
    /// [`Error::QueueFull`] when every queue slot is taken.
    pub async fn schedule_job(&self, dataset_id: &str, config: PipelineConfig) -> Result<String> {
        self.registry().validate(&config)?;

        let store = self.inner.store.clone();
        let id = dataset_id.to_string();
        self.acquire_and_run(dataset_id, || {
            run_blocking(move || {
                if store.contains(&DocumentKey::dataset_table(&id)?)? {
                    Ok(())
                } else {
                    Err(Error::not_found(format!("Dataset {}", id)))
                }
            })
        })
        .await?;

        let result_id = Uuid::new_v4().to_string();
        {
            let (id, dataset_id, config) = (result_id.clone(), dataset_id.to_string(), config.clone());
            self.with_jobs(move |jobs| jobs.create(&id, &dataset_id, &config)).await?;
        }

        let steps = config.len();
        let job = QueuedJob {
            result_id: result_id.clone(),
            dataset_id: dataset_id.to_string(),
            config,
        };

        match self.inner.sender.try_send(job) {
            Ok(()) => {
                tracing::info!(
                    "Scheduled job {} for dataset {} ({} steps)",
                    result_id,
                    dataset_id,
                    steps
                );
                Ok(result_id)
            }
            Err(TrySendError::Full(job)) => {
                self.with_jobs(move |jobs| jobs.discard(&job.result_id)).await?;
                tracing::warn!("Job queue full, rejected job for dataset {}", dataset_id);
                Err(Error::QueueFull(self.inner.queue_capacity))
            }
            Err(TrySendError::Closed(job)) => {
                self.with_jobs(move |jobs| jobs.discard(&job.result_id)).await?;
                Err(Error::internal("Job workers are not running"))
            }
        }
    }

    /// Run a pipeline on the first `rows` rows of a dataset, under the
    /// dataset's lock
    pub async fn preview(&self, dataset_id: &str, config: PipelineConfig, rows: usize) -> Result<PreviewOutput> {
        self.registry().validate(&config)?;

        let executor = self.clone();
        let id = dataset_id.to_string();
        self.acquire_and_run(dataset_id, move || {
            run_blocking(move || {
                let sample = executor.load_dataset(&id)?.head(rows);
                let output = executor.inner.pipeline.run(sample.clone(), &config, |_, _| Ok(()))?;
                Ok(PreviewOutput { sample, output })
            })
        })
        .await
    }

    /// Execute a queued job under its result id's lock.
    ///
    /// Every error, including a panic inside the pipeline, ends in the
    /// Failed state; nothing is returned to the caller.
    pub(crate) async fn execute(&self, job: QueuedJob) {
        let result_id = job.result_id.clone();

        let outcome = self
            .acquire_and_run(&result_id, move || async move {
                let id = job.result_id.clone();
                let result = self.run_guarded(job).await;
                if let Err(e) = &result {
                    self.record_failure(&id, e).await;
                }
                Ok(result.is_ok())
            })
            .await;

        match outcome {
            Ok(true) => tracing::info!("Job {} completed successfully", result_id),
            Ok(false) => {}
            Err(e) => self.record_failure(&result_id, &e).await,
        }

        self.inner.locks.prune_idle();
    }

    async fn run_guarded(&self, job: QueuedJob) -> Result<()> {
        let executor = self.clone();
        tokio::task::spawn_blocking(move || executor.run_job(&job))
            .await
            .map_err(|e| {
                if e.is_panic() {
                    Error::internal("Job task panicked")
                } else {
                    Error::internal(format!("Job task aborted: {}", e))
                }
            })?
    }

    /// Load, transform and save; runs on a blocking thread
    fn run_job(&self, job: &QueuedJob) -> Result<()> {
        let jobs = &self.inner.jobs;
        let id = job.result_id.as_str();

        jobs.start(id)?;
        let table = self.load_dataset(&job.dataset_id)?;
        tracing::debug!(
            "Job {} loaded dataset {}: {} rows, {} columns",
            id,
            job.dataset_id,
            table.row_count(),
            table.column_count()
        );
        jobs.advance(id, Stage::Preprocessing, 20.0, None)?;

        let total = job.config.len().max(1) as f32;
        let output = self.inner.pipeline.run(table, &job.config, |index, step| {
            let percent = 20.0 + 70.0 * index as f32 / total;
            jobs.advance(id, Stage::ProcessingMethod, percent, Some(step.method_id.clone()))
        })?;

        jobs.advance(id, Stage::Saving, 90.0, None)?;
        let metadata = ResultMetadata::new(id, &job.dataset_id, &job.config, &output);
        jobs.complete(id, &output.table, &metadata)
    }

    async fn record_failure(&self, result_id: &str, error: &Error) {
        tracing::error!("Job {} failed: {}", result_id, error);
        let (id, message) = (result_id.to_string(), error.to_string());
        if let Err(e) = self.with_jobs(move |jobs| jobs.fail(&id, &message)).await {
            tracing::error!("Failed to record failure of job {}: {}", result_id, e);
        }
    }

    /// Run a job state change on the blocking pool
    async fn with_jobs<T, F>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(&JobStateStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let jobs = self.inner.jobs.clone();
        run_blocking(move || operation(&jobs)).await
    }
}

/// Run synchronous store work off the async workers. Document writes
/// fsync and may sleep between retries.
pub(crate) async fn run_blocking<T, F>(operation: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(operation).await.map_err(|e| {
        if e.is_panic() {
            Error::internal("Blocking task panicked")
        } else {
            Error::internal(format!("Blocking task aborted: {}", e))
        }
    })?
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("store", &self.inner.store.name())
            .field("queue_capacity", &self.inner.queue_capacity)
            .field("lock_timeout", &self.inner.lock_timeout)
            .finish()
    }
}
