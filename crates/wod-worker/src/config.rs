//! Worker configuration.

use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Prompt used when neither `ANALYSIS_PROMPT` nor `PROMPT_FILE` is set.
pub const DEFAULT_PROMPT: &str = "Analyze the movement and find strong point and weakness. \
Also it is intensive enough for the user's fitness level";

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent task executions
    pub concurrency: usize,
    /// How long in-flight tasks may run after shutdown is requested
    pub shutdown_timeout: Duration,
    /// How long interrupted tasks get to delete their remote files
    pub cleanup_timeout: Duration,
    /// How long a single read blocks when the stream is empty
    pub consume_block: Duration,
    /// How often the worker scans for orphaned pending tasks
    pub claim_interval: Duration,
    /// Minimum idle time before a pending task can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// How often due retries are moved back onto the stream
    pub promote_interval: Duration,
    /// Prompt sent with every video
    pub prompt: String,
    /// Port for the Prometheus scrape endpoint, if any
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            shutdown_timeout: Duration::from_secs(30),
            cleanup_timeout: Duration::from_secs(10),
            consume_block: Duration::from_secs(1),
            claim_interval: Duration::from_secs(60),
            // Longer than the worst-case upload, processing wait and generation
            claim_min_idle: Duration::from_secs(1800),
            promote_interval: Duration::from_secs(5),
            prompt: DEFAULT_PROMPT.to_string(),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        Ok(Self {
            concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.concurrency),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT").unwrap_or(defaults.shutdown_timeout),
            cleanup_timeout: env_secs("WORKER_CLEANUP_TIMEOUT_SECS").unwrap_or(defaults.cleanup_timeout),
            consume_block: defaults.consume_block,
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS").unwrap_or(defaults.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS").unwrap_or(defaults.claim_min_idle),
            promote_interval: env_secs("WORKER_PROMOTE_INTERVAL_SECS")
                .unwrap_or(defaults.promote_interval),
            prompt: load_prompt()?,
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        })
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

fn load_prompt() -> WorkerResult<String> {
    if let Ok(prompt) = std::env::var("ANALYSIS_PROMPT") {
        if !prompt.trim().is_empty() {
            return Ok(prompt);
        }
    }

    match std::env::var("PROMPT_FILE") {
        Ok(path) if !path.trim().is_empty() => {
            let prompt = std::fs::read_to_string(&path).map_err(|e| {
                WorkerError::config_error(format!("failed to read PROMPT_FILE {}: {}", path, e))
            })?;
            let prompt = prompt.trim();
            if prompt.is_empty() {
                return Err(WorkerError::config_error(format!("PROMPT_FILE {} is empty", path)));
            }
            Ok(prompt.to_string())
        }
        _ => Ok(DEFAULT_PROMPT.to_string()),
    }
}
