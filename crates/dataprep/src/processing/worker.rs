//! Background worker for processing jobs

use std::sync::Arc;
use tokio::sync::Mutex;

use super::executor::{JobExecutor, JobReceiver};

/// Pulls queued jobs and hands them to the executor, one at a time
pub struct ProcessingWorker {
    id: usize,
    executor: JobExecutor,
}

impl ProcessingWorker {
    pub fn new(id: usize, executor: JobExecutor) -> Self {
        Self { id, executor }
    }

    /// Process jobs until the queue is closed
    pub async fn run(self, receiver: Arc<Mutex<JobReceiver>>) {
        tracing::info!("Processing worker {} started", self.id);

        loop {
            let job = receiver.lock().await.recv().await;
            let Some(job) = job else {
                break;
            };

            tracing::info!(
                "Worker {} processing job {} ({} steps, dataset {})",
                self.id,
                job.result_id,
                job.config.len(),
                job.dataset_id
            );
            self.executor.execute(job).await;
        }

        tracing::info!("Processing worker {} stopped", self.id);
    }
}
