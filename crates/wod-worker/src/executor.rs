//! Task executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use wod_gemini::ServiceFactory;
use wod_queue::{Delivery, RetryDecision, TaskConsumer};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::handler::{AnalysisHandler, TaskOutcome};
use crate::metrics;

/// Pulls deliveries from the queue and runs them on a bounded pool.
pub struct TaskExecutor<F> {
    config: WorkerConfig,
    queue: Arc<dyn TaskConsumer>,
    handler: Arc<AnalysisHandler<F>>,
    semaphore: Arc<Semaphore>,
    consumer_name: String,
    /// Cancelled once the shutdown timeout runs out; in-flight tasks stop
    /// their remote calls and clean up.
    interrupt: CancellationToken,
}

impl<F: ServiceFactory + 'static> TaskExecutor<F> {
    /// Create a new task executor.
    pub fn new(config: WorkerConfig, queue: Arc<dyn TaskConsumer>, handler: AnalysisHandler<F>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            handler: Arc::new(handler),
            semaphore,
            consumer_name,
            interrupt: CancellationToken::new(),
        }
    }

    /// Run until `shutdown` is cancelled, then drain in-flight tasks.
    ///
    /// Tasks still running after the shutdown timeout are interrupted and
    /// get the cleanup timeout to delete their remote files before they are
    /// aborted.
    pub async fn run(&self, shutdown: CancellationToken) -> WorkerResult<()> {
        info!(
            "Starting task executor '{}' with {} concurrent tasks",
            self.consumer_name, self.config.concurrency
        );

        self.queue.init().await?;

        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut next_promote = Instant::now();
        let mut next_claim = Instant::now();

        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown signal received, stopping executor");
                break;
            }

            // Maintenance runs between reads so a read is never dropped mid-flight
            let now = Instant::now();
            if now >= next_promote {
                if let Err(e) = self.queue.promote_due(100).await {
                    warn!("Failed to promote due retries: {}", e);
                }
                next_promote = now + self.config.promote_interval;
            }
            if now >= next_claim {
                self.claim_stale(&mut tasks).await;
                next_claim = now + self.config.claim_interval;
            }

            // The read always runs to completion: entries Redis hands out
            // must reach a task or go back to the stream
            match self.consume().await {
                Ok(deliveries) if shutdown.is_cancelled() => {
                    self.release_all(deliveries).await;
                    info!("Shutdown signal received, stopping executor");
                    break;
                }
                Ok(deliveries) => self.dispatch(&mut tasks, deliveries),
                Err(e) => {
                    error!("Error consuming tasks: {}", e);
                    // Back off on error
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    }
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!("Task execution panicked: {}", e);
                }
            }
        }

        self.drain(&mut tasks).await;
        info!("Task executor stopped");
        Ok(())
    }

    /// Take over deliveries abandoned by crashed or aborted workers.
    async fn claim_stale(&self, tasks: &mut JoinSet<()>) {
        let free = self.semaphore.available_permits();
        if free == 0 {
            return;
        }

        match self
            .queue
            .claim_stale(&self.consumer_name, self.config.claim_min_idle, free)
            .await
        {
            Ok(deliveries) => self.dispatch(tasks, deliveries),
            Err(e) => warn!("Failed to claim stale tasks: {}", e),
        }
    }

    /// Read as many deliveries as there are free slots.
    async fn consume(&self) -> WorkerResult<Vec<Delivery>> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(Vec::new());
        }

        let block_ms = self.config.consume_block.as_millis() as u64;
        let deliveries = self
            .queue
            .consume(&self.consumer_name, block_ms, available)
            .await?;

        if !deliveries.is_empty() {
            debug!("Consumed {} tasks from queue", deliveries.len());
        }
        Ok(deliveries)
    }

    /// Hand unstarted deliveries back to the queue.
    async fn release_all(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            if let Err(e) = self.queue.release(&delivery).await {
                warn!(
                    "Failed to release task {}, it stays pending: {}",
                    delivery.task_id, e
                );
            }
        }
    }

    fn dispatch(&self, tasks: &mut JoinSet<()>, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    // Stays pending for this consumer and is claimed again later
                    warn!("No free slot for task {}, leaving it pending", delivery.task_id);
                    continue;
                }
            };

            let handler = Arc::clone(&self.handler);
            let queue = Arc::clone(&self.queue);
            let interrupt = self.interrupt.clone();
            tasks.spawn(async move {
                let _permit = permit;
                execute(handler, queue, delivery, interrupt).await;
            });
        }
    }

    async fn drain(&self, tasks: &mut JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }

        info!("Waiting for {} in-flight tasks to complete...", tasks.len());
        let finished = tokio::time::timeout(self.config.shutdown_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if finished.is_ok() {
            return;
        }

        warn!("Shutdown timeout reached, interrupting {} tasks", tasks.len());
        self.interrupt.cancel();
        let released = tokio::time::timeout(self.config.cleanup_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if released.is_err() {
            warn!(
                "Cleanup timeout reached, aborting {} tasks; they will be claimed again",
                tasks.len()
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

/// Run one delivery and settle it with the queue.
async fn execute<F: ServiceFactory>(
    handler: Arc<AnalysisHandler<F>>,
    queue: Arc<dyn TaskConsumer>,
    delivery: Delivery,
    interrupt: CancellationToken,
) {
    let started = Instant::now();
    let outcome = handler.handle(&delivery, &interrupt).await;
    metrics::record_task(outcome.label(), started.elapsed());

    settle(queue.as_ref(), &delivery, &outcome).await;
}

/// Apply a task outcome to the queue.
///
/// A failed settle leaves the delivery pending, so it is claimed again.
pub async fn settle(queue: &dyn TaskConsumer, delivery: &Delivery, outcome: &TaskOutcome) {
    let task_id = &delivery.task_id;

    match outcome {
        TaskOutcome::Done => {
            info!("Task {} completed successfully", task_id);
            if let Err(e) = queue.ack(&delivery.message_id).await {
                error!("Failed to ack task {}: {}", task_id, e);
            }
        }
        TaskOutcome::Retry(reason) => match queue.retry(delivery, reason).await {
            Ok(RetryDecision::Scheduled { attempt, delay }) => {
                metrics::record_retry_scheduled();
                info!("Task {} will be retried (attempt {}) in {:?}", task_id, attempt, delay);
            }
            Ok(RetryDecision::Exhausted) => {
                metrics::record_dead_lettered();
                warn!("Task {} exceeded max retries, moved to DLQ", task_id);
            }
            Err(e) => error!("Failed to schedule retry for task {}: {}", task_id, e),
        },
        TaskOutcome::Skip(reason) => {
            warn!("Task {} will not be retried: {}", task_id, reason);
            match queue.dead_letter(delivery, reason).await {
                Ok(()) => metrics::record_dead_lettered(),
                Err(e) => error!("Failed to move task {} to DLQ: {}", task_id, e),
            }
        }
        TaskOutcome::Interrupted => {
            info!("Task {} interrupted by shutdown, releasing it", task_id);
            if let Err(e) = queue.release(delivery).await {
                error!("Failed to release task {}: {}", task_id, e);
            }
        }
    }
}
