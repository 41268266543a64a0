//! Per-resource exclusive access for datasets and job results

mod registry;

pub use registry::{ResourceGuard, ResourceLockRegistry};
