//! Structured task logging.
//!
//! Every line logged for a task carries the task id and session id, and
//! state transitions go through one place so a task's path through the
//! pipeline can be read straight out of the logs.

use std::fmt;

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter};

use wod_gemini::Stage;
use wod_models::TaskId;

/// Where a task execution currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Received,
    Uploading,
    Polling,
    Generating,
    Persisting,
    Done,
    Retry,
    Skip,
    Interrupted,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Received => "RECEIVED",
            TaskState::Uploading => "UPLOADING",
            TaskState::Polling => "POLLING",
            TaskState::Generating => "GENERATING",
            TaskState::Persisting => "PERSISTING",
            TaskState::Done => "DONE",
            TaskState::Retry => "RETRY",
            TaskState::Skip => "SKIP",
            TaskState::Interrupted => "INTERRUPTED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Stage> for TaskState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Uploading => TaskState::Uploading,
            Stage::Polling => TaskState::Polling,
            Stage::Generating => TaskState::Generating,
        }
    }
}

/// Task logger carrying the task and session ids.
#[derive(Debug, Clone)]
pub struct TaskLogger {
    task_id: String,
    session_id: String,
}

impl TaskLogger {
    pub fn new(task_id: &TaskId, session_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn transition(&self, state: TaskState) {
        info!(
            task_id = %self.task_id,
            session_id = %self.session_id,
            state = %state,
            "Task state changed"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            task_id = %self.task_id,
            session_id = %self.session_id,
            "Task warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            task_id = %self.task_id,
            session_id = %self.session_id,
            "Task error: {}", message
        );
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Span covering one task execution.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "task",
            task_id = %self.task_id,
            session_id = %self.session_id
        )
    }
}

/// Install the global tracing subscriber.
///
/// `LOG_FORMAT=json` switches to JSON lines; otherwise output is colored text.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("wod=info".parse().expect("static directive"))
        .add_directive("sqlx=warn".parse().expect("static directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(subscriber_fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                subscriber_fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .with(env_filter)
            .init();
    }
}
