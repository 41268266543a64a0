//! Application state for the preprocessing server

use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::PrepConfig;
use crate::error::Result;
use crate::ingestion::TableLoader;
use crate::locking::ResourceLockRegistry;
use crate::processing::{JobExecutor, StatusQueryService};
use crate::storage::{DocumentStore, FsDocumentStore};
use crate::transforms::TransformRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: PrepConfig,
    /// Datasets, results and job documents
    store: Arc<dyn DocumentStore>,
    /// Upload parser
    loader: TableLoader,
    /// Locked execution and job scheduling
    executor: JobExecutor,
    /// Status polling
    status: StatusQueryService,
    /// Ready state
    ready: RwLock<bool>,
}

impl AppState {
    /// Create state backed by the configured data directory and start the
    /// job workers
    pub async fn new(config: PrepConfig) -> Result<Self> {
        let store = Arc::new(FsDocumentStore::new(&config.storage.data_dir)?);
        Ok(Self::with_store(config, store))
    }

    /// Create state over an existing document store and start the job
    /// workers. Must be called inside a tokio runtime.
    pub fn with_store(config: PrepConfig, store: Arc<dyn DocumentStore>) -> Self {
        tracing::info!("Initializing preprocessing state (store: {})...", store.name());

        let locks = ResourceLockRegistry::new();
        let registry = Arc::new(TransformRegistry::with_builtins());
        tracing::info!("Registered {} preprocessing methods", registry.methods().len());

        let (executor, receiver) =
            JobExecutor::new(locks.clone(), store.clone(), registry, &config.processing);
        let worker_count = config.processing.workers();
        executor.start_workers(receiver, worker_count);
        tracing::info!(
            "Job queue initialized with {} workers (capacity {})",
            worker_count,
            config.processing.queue_capacity
        );

        let status = StatusQueryService::new(locks, executor.jobs().clone());
        let loader = TableLoader::new(config.dataset.max_rows);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                loader,
                executor,
                status,
                ready: RwLock::new(true),
            }),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &PrepConfig {
        &self.inner.config
    }

    /// Get document store
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    /// Get upload loader
    pub fn loader(&self) -> &TableLoader {
        &self.inner.loader
    }

    /// Get job executor
    pub fn executor(&self) -> &JobExecutor {
        &self.inner.executor
    }

    /// Get status query service
    pub fn status(&self) -> &StatusQueryService {
        &self.inner.status
    }

    /// Check if the server is ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}
