//! Exercise video analysis worker.
//!
//! Consumes `video:analysis` tasks, sends each video through Gemini and
//! records the outcome in the result store. Scratch files and remote files
//! are released on every exit path.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod signal;

pub use cleanup::{CleanupReport, CleanupScope};
pub use config::{WorkerConfig, DEFAULT_PROMPT};
pub use error::{WorkerError, WorkerResult};
pub use executor::{settle, TaskExecutor};
pub use handler::{AnalysisHandler, TaskOutcome, SCRATCH_MISSING};
pub use logging::{init_tracing, TaskLogger, TaskState};
pub use signal::shutdown_signal;
