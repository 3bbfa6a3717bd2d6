//! Redis Streams task queue.
//!
//! This crate provides:
//! - The `video:analysis` task payload and its wire format
//! - Task enqueueing via Redis Streams consumer groups
//! - Crash recovery by claiming stale pending entries
//! - Bounded retries with exponential backoff and a dead-letter stream

pub mod error;
pub mod queue;
pub mod retry;
pub mod task;

pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, QueueConfig, RetryDecision, TaskConsumer, TaskProducer};
pub use retry::RetryPolicy;
pub use task::{AnalyzeVideoTask, Delivery, TASK_TYPE_VIDEO_ANALYSIS};
