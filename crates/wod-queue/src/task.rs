//! Task payloads and deliveries.

use redis::streams::StreamId;
use serde::{Deserialize, Serialize};

use wod_models::TaskId;

use crate::error::{QueueError, QueueResult};

/// Task type tag for video analysis.
pub const TASK_TYPE_VIDEO_ANALYSIS: &str = "video:analysis";

/// Payload of a video analysis task.
///
/// The wire format is a JSON object with exactly these two fields. Unknown
/// fields are rejected so a payload from an incompatible producer is treated
/// as malformed rather than half-understood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzeVideoTask {
    /// Client-supplied session identifier
    pub session_id: String,
    /// Scratch file holding the uploaded video
    pub file_path: String,
}

impl AnalyzeVideoTask {
    /// Create a new analysis task.
    pub fn new(session_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            file_path: file_path.into(),
        }
    }

    /// Serialize to the queue wire format.
    pub fn to_payload(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a payload taken off the queue.
    ///
    /// Every failure is reported as [`QueueError::MalformedPayload`]: the bytes
    /// will be identical on every redelivery.
    pub fn from_payload(payload: &[u8]) -> QueueResult<Self> {
        let task: Self =
            serde_json::from_slice(payload).map_err(|e| QueueError::malformed(e.to_string()))?;

        if task.session_id.trim().is_empty() {
            return Err(QueueError::malformed("session_id is empty"));
        }
        if task.file_path.trim().is_empty() {
            return Err(QueueError::malformed("file_path is empty"));
        }

        Ok(task)
    }
}

/// One delivery of a task to a consumer.
///
/// The payload is kept as raw bytes; decoding is the consumer's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stream entry ID, used to ack this delivery
    pub message_id: String,
    /// Queue-assigned task ID, stable across retries
    pub task_id: TaskId,
    /// Task type tag
    pub task_type: String,
    /// Number of retries that preceded this delivery (0 on first delivery)
    pub attempt: u32,
    /// Raw task payload
    pub payload: Vec<u8>,
}

impl Delivery {
    /// Build a delivery from a stream entry.
    ///
    /// Missing fields are tolerated here; an empty payload simply fails to
    /// decode later and the entry is dead-lettered.
    pub fn from_stream_id(entry: &StreamId) -> Self {
        let task_id = entry
            .get::<String>("task_id")
            .unwrap_or_else(|| entry.id.clone());
        let task_type = entry
            .get::<String>("type")
            .unwrap_or_else(|| TASK_TYPE_VIDEO_ANALYSIS.to_string());
        let attempt = entry.get::<u32>("attempt").unwrap_or(0);
        let payload = entry.get::<Vec<u8>>("payload").unwrap_or_default();

        Self {
            message_id: entry.id.clone(),
            task_id: TaskId::from_string(task_id),
            task_type,
            attempt,
            payload,
        }
    }

    /// Payload as text, for logs and dead-letter records.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
