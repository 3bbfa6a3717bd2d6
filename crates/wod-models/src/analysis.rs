//! Analysis result records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal status of one worker execution.
///
/// There is no pending state: a row only exists once the worker reached a
/// terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    /// The analysis service returned text for the video.
    Completed,
    /// Upload, processing or generation failed; `output` holds the error.
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown analysis status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for AnalysisStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(AnalysisStatus::Completed),
            "FAILED" => Ok(AnalysisStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// A persisted analysis outcome for a session.
///
/// Rows accumulate per session: a session that failed twice before
/// succeeding has two `FAILED` rows followed by one `COMPLETED` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Store-assigned, monotonic identifier
    pub id: i64,
    /// Client-supplied session identifier
    pub session_id: String,
    /// Terminal status
    pub status: AnalysisStatus,
    /// Analysis text on success, error description on failure
    pub output: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A result row before the store has assigned its id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnalysisResult {
    pub session_id: String,
    pub status: AnalysisStatus,
    pub output: String,
}

impl NewAnalysisResult {
    /// Successful analysis carrying the generated text.
    pub fn completed(session_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: AnalysisStatus::Completed,
            output: output.into(),
        }
    }

    /// Failed analysis carrying the error description.
    pub fn failed(session_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: AnalysisStatus::Failed,
            output: error.into(),
        }
    }
}
