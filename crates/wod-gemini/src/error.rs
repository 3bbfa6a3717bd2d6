//! Gemini client error types.

use std::time::Duration;

use thiserror::Error;

pub type GeminiResult<T> = Result<T, GeminiError>;

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to upload file: {0}")]
    Upload(String),

    #[error("failed to get file info: {0}")]
    Status(String),

    #[error("file processing failed: {0}")]
    RemoteProcessing(String),

    #[error("file still processing after {0:?}")]
    ProcessingTimeout(Duration),

    #[error("failed to generate content: {0}")]
    Generate(String),

    #[error("no content generated")]
    EmptyGeneration,

    #[error("analysis cancelled")]
    Cancelled,

    #[error("Gemini API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GeminiError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// HTTP status returned by the API, if this error carries one.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            GeminiError::Api { status, .. } => Some(*status),
            GeminiError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.http_status() == Some(404)
    }
}
