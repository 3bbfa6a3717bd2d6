//! Gemini client configuration.

use std::fmt;
use std::time::Duration;

/// Configuration for the Gemini client and the analysis poll loop.
#[derive(Clone)]
pub struct GeminiConfig {
    /// API key sent with every request
    pub api_key: String,
    /// API root, without the version segment
    pub base_url: String,
    /// Generation model
    pub model: String,
    /// Timeout for a single HTTP request
    pub request_timeout: Duration,
    /// Delay between file state lookups
    pub poll_interval: Duration,
    /// Give up on a file that has not left processing by then
    pub max_processing_wait: Duration,
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("max_processing_wait", &self.max_processing_wait)
            .finish()
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-3-pro-preview".to_string(),
            request_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(2),
            max_processing_wait: Duration::from_secs(600),
        }
    }
}

impl GeminiConfig {
    /// Create config from environment variables.
    ///
    /// A missing `GEMINI_API_KEY` is not an error here; the client refuses to
    /// build without one.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("GEMINI_API_KEY").unwrap_or_default(),
            base_url: std::env::var("GEMINI_BASE_URL").unwrap_or(defaults.base_url),
            model: std::env::var("GEMINI_MODEL").unwrap_or(defaults.model),
            request_timeout: std::env::var("GEMINI_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            poll_interval: std::env::var("GEMINI_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            max_processing_wait: std::env::var("GEMINI_MAX_PROCESSING_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_processing_wait),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_processing_wait(mut self, max_processing_wait: Duration) -> Self {
        self.max_processing_wait = max_processing_wait;
        self
    }
}
