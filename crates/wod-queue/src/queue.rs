//! Task queue using Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamPendingCountReply, StreamReadReply};
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use wod_models::TaskId;

use crate::error::{QueueError, QueueResult};
use crate::retry::RetryPolicy;
use crate::task::{AnalyzeVideoTask, Delivery, TASK_TYPE_VIDEO_ANALYSIS};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for tasks
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Sorted set holding scheduled retries
    pub retry_set_name: String,
    /// Retry policy
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "wod:tasks".to_string(),
            consumer_group: "wod:workers".to_string(),
            dlq_stream_name: "wod:dlq".to_string(),
            retry_set_name: "wod:retry".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retry = RetryPolicy {
            max_retries: env_parse("QUEUE_MAX_RETRIES").unwrap_or(defaults.retry.max_retries),
            base_delay: env_parse("QUEUE_RETRY_BASE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry.base_delay),
            max_delay: env_parse("QUEUE_RETRY_MAX_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry.max_delay),
        };

        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            retry_set_name: std::env::var("QUEUE_RETRY_SET").unwrap_or(defaults.retry_set_name),
            retry,
        }
    }
}

// Every settle step below runs as one script: the delivery leaves the
// pending list in the same step that puts it somewhere else, or not at all.
// A delivery that is no longer pending is left alone.

/// KEYS: stream. ARGV: group, message id.
const ACK_SCRIPT: &str = r#"
if redis.call('XACK', KEYS[1], ARGV[1], ARGV[2]) == 0 then
    return 0
end
redis.call('XDEL', KEYS[1], ARGV[2])
return 1
"#;

/// KEYS: stream, retry set. ARGV: group, message id, due ms, member.
const RETRY_SCRIPT: &str = r#"
if redis.call('XACK', KEYS[1], ARGV[1], ARGV[2]) == 0 then
    return 0
end
redis.call('XDEL', KEYS[1], ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[4])
return 1
"#;

/// KEYS: stream, dead letter stream.
/// ARGV: group, message id, type, task id, attempt, payload, error.
const DEAD_LETTER_SCRIPT: &str = r#"
if redis.call('XACK', KEYS[1], ARGV[1], ARGV[2]) == 0 then
    return 0
end
redis.call('XDEL', KEYS[1], ARGV[2])
redis.call('XADD', KEYS[2], '*', 'type', ARGV[3], 'task_id', ARGV[4], 'attempt', ARGV[5],
    'payload', ARGV[6], 'error', ARGV[7], 'original_id', ARGV[2])
return 1
"#;

/// KEYS: stream. ARGV: group, message id, type, task id, attempt, payload.
const RELEASE_SCRIPT: &str = r#"
if redis.call('XACK', KEYS[1], ARGV[1], ARGV[2]) == 0 then
    return false
end
redis.call('XDEL', KEYS[1], ARGV[2])
return redis.call('XADD', KEYS[1], '*', 'type', ARGV[3], 'task_id', ARGV[4], 'attempt', ARGV[5],
    'payload', ARGV[6])
"#;

/// KEYS: retry set, stream. ARGV: member, type, task id, attempt, payload.
const PROMOTE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return false
end
return redis.call('XADD', KEYS[2], '*', 'type', ARGV[2], 'task_id', ARGV[3], 'attempt', ARGV[4],
    'payload', ARGV[5])
"#;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Producer side of the queue.
///
/// The ingestion endpoint only needs to enqueue and to report depth for
/// readiness, so it depends on this trait rather than on [`JobQueue`].
#[async_trait]
pub trait TaskProducer: Send + Sync {
    /// Enqueue one analysis task and return its task ID.
    async fn enqueue(&self, task: &AnalyzeVideoTask) -> QueueResult<TaskId>;

    /// Number of entries currently in the task stream.
    async fn depth(&self) -> QueueResult<u64>;
}

/// Consumer side of the queue, as driven by the worker executor.
#[async_trait]
pub trait TaskConsumer: Send + Sync {
    /// Make sure the stream and consumer group exist.
    async fn init(&self) -> QueueResult<()>;

    /// Read up to `count` new deliveries, blocking at most `block_ms`.
    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Take over deliveries left unacked for at least `min_idle`.
    async fn claim_stale(
        &self,
        consumer_name: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Move due retries back onto the stream.
    async fn promote_due(&self, limit: usize) -> QueueResult<usize>;

    /// Settle a delivery as done.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    /// Schedule a retry, or dead-letter when the budget is spent.
    async fn retry(&self, delivery: &Delivery, error: &str) -> QueueResult<RetryDecision>;

    /// Settle a delivery as permanently failed.
    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()>;

    /// Put a delivery that was never worked to completion back on the
    /// stream, keeping its attempt count.
    async fn release(&self, delivery: &Delivery) -> QueueResult<()>;
}

/// What happened to a delivery handed to [`JobQueue::retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Scheduled for redelivery after `delay`.
    Scheduled { attempt: u32, delay: Duration },
    /// Retry budget used up; moved to the dead letter stream.
    Exhausted,
}

/// Member of the retry sorted set.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RetryEntry {
    task_id: String,
    task_type: String,
    attempt: u32,
    payload: String,
    last_error: String,
}

/// Task queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new task queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Initialize the queue (create consumer group if not exists).
    ///
    /// The group starts at the beginning of the stream so tasks enqueued
    /// before the first worker came up are still delivered.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn add_entry(
        &self,
        conn: &mut MultiplexedConnection,
        task_id: &str,
        task_type: &str,
        attempt: u32,
        payload: &[u8],
    ) -> QueueResult<String> {
        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("type")
            .arg(task_type)
            .arg("task_id")
            .arg(task_id)
            .arg("attempt")
            .arg(attempt)
            .arg("payload")
            .arg(payload)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;
        Ok(message_id)
    }

    /// Read new deliveries for this consumer.
    ///
    /// Blocks for at most `block_ms` when the stream is empty.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;

        // A timed-out block replies nil
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let deliveries: Vec<Delivery> = reply
            .map(|r| r.keys)
            .unwrap_or_default()
            .iter()
            .flat_map(|key| key.ids.iter().map(Delivery::from_stream_id))
            .collect();

        if !deliveries.is_empty() {
            debug!("Consumed {} deliveries from stream", deliveries.len());
        }
        Ok(deliveries)
    }

    /// Claim entries another consumer read but never acked.
    ///
    /// Only entries idle for at least `min_idle` are taken over, which covers
    /// workers that crashed or were aborted mid-task.
    pub async fn claim_stale(
        &self,
        consumer_name: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }

        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;
        let deliveries: Vec<Delivery> = claimed.ids.iter().map(Delivery::from_stream_id).collect();

        if !deliveries.is_empty() {
            info!("Claimed {} stale deliveries", deliveries.len());
        }
        Ok(deliveries)
    }

    /// Acknowledge a delivery and drop it from the stream.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let acked: i64 = Script::new(ACK_SCRIPT)
            .key(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .invoke_async(&mut conn)
            .await?;

        if acked == 0 {
            debug!("Delivery {} was already settled", message_id);
        } else {
            debug!("Acknowledged delivery: {}", message_id);
        }
        Ok(())
    }

    /// Schedule another attempt, or dead-letter once the budget is spent.
    pub async fn retry(&self, delivery: &Delivery, error: &str) -> QueueResult<RetryDecision> {
        if !self.config.retry.allows(delivery.attempt) {
            self.dead_letter(delivery, error).await?;
            return Ok(RetryDecision::Exhausted);
        }

        let attempt = delivery.attempt + 1;
        let delay = self.config.retry.delay_for_attempt(attempt);
        let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let entry = RetryEntry {
            task_id: delivery.task_id.to_string(),
            task_type: delivery.task_type.clone(),
            attempt,
            payload: delivery.payload_lossy(),
            last_error: error.to_string(),
        };
        let member = serde_json::to_string(&entry)?;

        let mut conn = self.conn().await?;
        let scheduled: i64 = Script::new(RETRY_SCRIPT)
            .key(&self.config.stream_name)
            .key(&self.config.retry_set_name)
            .arg(&self.config.consumer_group)
            .arg(&delivery.message_id)
            .arg(due_ms)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        if scheduled == 0 {
            debug!("Delivery {} was already settled, not retrying", delivery.message_id);
        } else {
            info!(
                "Scheduled retry {} of task {} in {:?}",
                attempt, delivery.task_id, delay
            );
        }
        Ok(RetryDecision::Scheduled { attempt, delay })
    }

    /// Move retries whose due time has passed back onto the stream.
    ///
    /// Returns how many entries were promoted by this call.
    pub async fn promote_due(&self, limit: usize) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        let now_ms = Utc::now().timestamp_millis();

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.config.retry_set_name)
            .arg("-inf")
            .arg(now_ms)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut promoted = 0;
        for member in due {
            let entry: RetryEntry = match serde_json::from_str(&member) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Dropping unreadable retry entry: {}", e);
                    conn.zrem::<_, _, ()>(&self.config.retry_set_name, &member)
                        .await?;
                    continue;
                }
            };

            // Whoever removes the member owns the promotion
            let message_id: Option<String> = Script::new(PROMOTE_SCRIPT)
                .key(&self.config.retry_set_name)
                .key(&self.config.stream_name)
                .arg(&member)
                .arg(&entry.task_type)
                .arg(&entry.task_id)
                .arg(entry.attempt)
                .arg(entry.payload.as_bytes())
                .invoke_async(&mut conn)
                .await?;
            if message_id.is_some() {
                promoted += 1;
            }
        }

        if promoted > 0 {
            debug!("Promoted {} due retries", promoted);
        }
        Ok(promoted)
    }

    /// Move a delivery to the dead letter stream without redelivery.
    pub async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let moved: i64 = Script::new(DEAD_LETTER_SCRIPT)
            .key(&self.config.stream_name)
            .key(&self.config.dlq_stream_name)
            .arg(&self.config.consumer_group)
            .arg(&delivery.message_id)
            .arg(&delivery.task_type)
            .arg(delivery.task_id.as_str())
            .arg(delivery.attempt)
            .arg(&delivery.payload)
            .arg(error)
            .invoke_async(&mut conn)
            .await?;

        if moved == 0 {
            debug!("Delivery {} was already settled, not dead-lettering", delivery.message_id);
        } else {
            warn!("Moved task {} to DLQ: {}", delivery.task_id, error);
        }
        Ok(())
    }

    /// Requeue a delivery without counting an attempt.
    ///
    /// Used for work stopped by shutdown, so the next worker picks it up
    /// straight away instead of waiting for it to go stale.
    pub async fn release(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let message_id: Option<String> = Script::new(RELEASE_SCRIPT)
            .key(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&delivery.message_id)
            .arg(&delivery.task_type)
            .arg(delivery.task_id.as_str())
            .arg(delivery.attempt)
            .arg(&delivery.payload)
            .invoke_async(&mut conn)
            .await?;

        match message_id {
            Some(id) => info!("Released task {} back to the queue as {}", delivery.task_id, id),
            None => debug!("Delivery {} was already settled, not releasing", delivery.message_id),
        }
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Number of scheduled retries.
    pub async fn retry_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.zcard(&self.config.retry_set_name).await?;
        Ok(len)
    }
}

#[async_trait]
impl TaskProducer for JobQueue {
    async fn enqueue(&self, task: &AnalyzeVideoTask) -> QueueResult<TaskId> {
        let payload = task.to_payload()?;
        let task_id = TaskId::new();

        let mut conn = self.conn().await?;
        let message_id = self
            .add_entry(
                &mut conn,
                task_id.as_str(),
                TASK_TYPE_VIDEO_ANALYSIS,
                0,
                payload.as_bytes(),
            )
            .await?;

        info!(
            "Enqueued task {} for session {} with message ID {}",
            task_id, task.session_id, message_id
        );
        Ok(task_id)
    }

    async fn depth(&self) -> QueueResult<u64> {
        self.len().await
    }
}

#[async_trait]
impl TaskConsumer for JobQueue {
    async fn init(&self) -> QueueResult<()> {
        JobQueue::init(self).await
    }

    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        JobQueue::consume(self, consumer_name, block_ms, count).await
    }

    async fn claim_stale(
        &self,
        consumer_name: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        JobQueue::claim_stale(self, consumer_name, min_idle, count).await
    }

    async fn promote_due(&self, limit: usize) -> QueueResult<usize> {
        JobQueue::promote_due(self, limit).await
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        JobQueue::ack(self, message_id).await
    }

    async fn retry(&self, delivery: &Delivery, error: &str) -> QueueResult<RetryDecision> {
        JobQueue::retry(self, delivery, error).await
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        JobQueue::dead_letter(self, delivery, error).await
    }

    async fn release(&self, delivery: &Delivery) -> QueueResult<()> {
        JobQueue::release(self, delivery).await
    }
}
