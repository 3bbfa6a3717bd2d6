//! Application state.

use std::sync::Arc;

use wod_queue::TaskProducer;
use wod_store::ResultStore;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub queue: Arc<dyn TaskProducer>,
    pub store: Arc<dyn ResultStore>,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: ApiConfig, queue: Arc<dyn TaskProducer>, store: Arc<dyn ResultStore>) -> Self {
        Self { config, queue, store }
    }
}
