//! Redis Streams job queue.
//!
//! This crate provides:
//! - Job enqueueing via Redis Streams with idempotency keys
//! - Consumer-group consumption with retry counters and a DLQ
//! - Progress events via Redis Pub/Sub

pub mod error;
pub mod job;
pub mod progress;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::{AnalyzeVideoJob, QueueJob};
pub use progress::{ProgressChannel, ProgressEvent, ProgressStream};
pub use queue::{JobQueue, QueueConfig};
