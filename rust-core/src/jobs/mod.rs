//! Calibration jobs: durable records, artifact cache and the worker pool that runs them

pub mod store;
pub mod cache;
pub mod pool;
pub mod orchestrator;

pub use cache::{CacheKey, FsModelCache, MemoryModelCache, ModelCache};
pub use orchestrator::Orchestrator;
pub use pool::WorkerPool;
pub use store::{
    BatchRecord, CalibJob, JobKey, JobStatus, JobStore, MemoryJobStore, Registration, Summary,
    Target,
};
