//! Background processing with job queue and progress tracking

mod executor;
mod job_state;
mod pipeline;
mod status;
mod worker;

pub use executor::{JobExecutor, JobReceiver, PreviewOutput, QueuedJob};
pub(crate) use executor::run_blocking;
pub use job_state::{
    JobRecord, JobState, JobStateStore, ProgressSnapshot, QueueStats, ResultMetadata, Stage,
};
pub use pipeline::{PipelineOutput, StepReport, TransformPipeline};
pub use status::{StatusQueryService, StatusView};
pub use worker::ProcessingWorker;
