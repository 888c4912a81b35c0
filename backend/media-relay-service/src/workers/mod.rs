/// Background workers for media-relay-service
pub mod job_worker;

pub use job_worker::{run_worker_pool, JobOutcome, JobWorker};
