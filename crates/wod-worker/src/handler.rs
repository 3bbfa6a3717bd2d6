//! One execution of a `video:analysis` task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use wod_gemini::{Analyzer, GeminiConfig, GeminiError, ServiceFactory};
use wod_models::NewAnalysisResult;
use wod_queue::{AnalyzeVideoTask, Delivery};
use wod_store::ResultStore;

use crate::cleanup::CleanupScope;
use crate::logging::{TaskLogger, TaskState};

/// Row output written when a redelivered task finds its video already gone.
pub const SCRATCH_MISSING: &str = "scratch file missing";

/// How a delivery should be settled with the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Acknowledge; the task is finished.
    Done,
    /// Hand back to the queue's retry policy.
    Retry(String),
    /// Dead-letter without redelivery.
    Skip(String),
    /// Stopped by shutdown before a result was known; no row was written
    /// and the scratch file is kept for the next delivery.
    Interrupted,
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Done => "completed",
            TaskOutcome::Retry(_) => "failed",
            TaskOutcome::Skip(_) => "skipped",
            TaskOutcome::Interrupted => "interrupted",
        }
    }

    fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Done => TaskState::Done,
            TaskOutcome::Retry(_) => TaskState::Retry,
            TaskOutcome::Skip(_) => TaskState::Skip,
            TaskOutcome::Interrupted => TaskState::Interrupted,
        }
    }
}

/// Runs the analysis pipeline for one delivery.
///
/// Holds no per-task state: a fresh service client is built for every task
/// and the store is the only thing shared between executions.
pub struct AnalysisHandler<F> {
    factory: F,
    store: Arc<dyn ResultStore>,
    prompt: String,
    poll_interval: Duration,
    max_processing_wait: Duration,
}

impl<F: ServiceFactory> AnalysisHandler<F> {
    pub fn new(factory: F, store: Arc<dyn ResultStore>, prompt: impl Into<String>) -> Self {
        let defaults = GeminiConfig::default();
        Self {
            factory,
            store,
            prompt: prompt.into(),
            poll_interval: defaults.poll_interval,
            max_processing_wait: defaults.max_processing_wait,
        }
    }

    /// Override how the remote processing state is polled.
    pub fn with_polling(mut self, poll_interval: Duration, max_processing_wait: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.max_processing_wait = max_processing_wait;
        self
    }

    /// Execute one delivery and decide how it is settled.
    ///
    /// Cancelling `cancel` interrupts the remote calls; the remote file is
    /// still deleted before this returns.
    pub async fn handle(&self, delivery: &Delivery, cancel: &CancellationToken) -> TaskOutcome {
        let task = match AnalyzeVideoTask::from_payload(&delivery.payload) {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(
                    task_id = %delivery.task_id,
                    payload = %delivery.payload_lossy(),
                    "Dropping undecodable task: {}", e
                );
                return TaskOutcome::Skip(e.to_string());
            }
        };

        let logger = TaskLogger::new(&delivery.task_id, &task.session_id);
        let span = logger.create_span();
        async {
            logger.transition(TaskState::Received);
            let outcome = self.run(&task, &logger, cancel).await;
            if let TaskOutcome::Retry(reason) | TaskOutcome::Skip(reason) = &outcome {
                logger.log_error(reason);
            }
            logger.transition(outcome.state());
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        task: &AnalyzeVideoTask,
        logger: &TaskLogger,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        let service = match self.factory.create() {
            Ok(service) => service,
            // Nothing was touched yet: keep the scratch file for the redelivery
            Err(e) => return TaskOutcome::Retry(format!("failed to create analysis client: {}", e)),
        };
        let analyzer = Analyzer::new(service, self.poll_interval, self.max_processing_wait);

        let scratch = PathBuf::from(&task.file_path);
        let mut scope = CleanupScope::new(&scratch);

        // Only a definite "not there" skips; other errors surface from the upload
        let missing = matches!(tokio::fs::try_exists(&scratch).await, Ok(false));

        let outcome = if missing {
            logger.log_warning(&format!("{}: {}", SCRATCH_MISSING, scratch.display()));
            logger.transition(TaskState::Persisting);
            self.persist(
                NewAnalysisResult::failed(&task.session_id, SCRATCH_MISSING),
                TaskOutcome::Skip(SCRATCH_MISSING.to_string()),
            )
            .await
        } else {
            let report = analyzer
                .analyze(&scratch, &self.prompt, cancel, |stage| logger.transition(stage.into()))
                .await;
            if let Some(name) = &report.asset {
                scope.track_remote(name.clone());
            }

            match report.result {
                Err(GeminiError::Cancelled) => {
                    scope.keep_scratch();
                    TaskOutcome::Interrupted
                }
                Ok(text) => {
                    logger.transition(TaskState::Persisting);
                    self.persist(NewAnalysisResult::completed(&task.session_id, text), TaskOutcome::Done)
                        .await
                }
                Err(e) => {
                    logger.transition(TaskState::Persisting);
                    let reason = e.to_string();
                    self.persist(
                        NewAnalysisResult::failed(&task.session_id, &reason),
                        TaskOutcome::Retry(reason),
                    )
                    .await
                }
            }
        };

        scope.release(&analyzer).await;
        outcome
    }

    /// Write the row; a failed write turns any outcome into a retry.
    async fn persist(&self, row: NewAnalysisResult, outcome: TaskOutcome) -> TaskOutcome {
        match self.store.insert(row).await {
            Ok(_) => outcome,
            Err(e) => TaskOutcome::Retry(format!("failed to persist result: {}", e)),
        }
    }
}
