//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] wod_queue::QueueError),

    #[error("Store error: {0}")]
    Store(#[from] wod_store::StoreError),

    #[error("Gemini error: {0}")]
    Gemini(#[from] wod_gemini::GeminiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
