//! Asynchronous chunk-then-embed job queue.

pub mod clock;
pub mod delay;
pub mod job;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use delay::DelayQueue;
pub use job::{EmbeddingJob, JobEvent, JobStatus};
pub use worker::{EmbeddingWorker, WorkerOptions};
