//! Result store for analysis outcomes.
//!
//! Rows are insert-only: the worker appends one row per terminal execution
//! and the query endpoint reads them back in insertion order.

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use wod_models::{AnalysisResult, NewAnalysisResult};

pub use config::{connect, migrate, DbConfig};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryResultStore;
pub use postgres::PgResultStore;

/// Persistence for analysis results.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Append a row and return it with its assigned id and timestamps.
    async fn insert(&self, result: NewAnalysisResult) -> StoreResult<AnalysisResult>;

    /// All rows for a session, oldest first. Empty when the session is unknown.
    async fn list_by_session(&self, session_id: &str) -> StoreResult<Vec<AnalysisResult>>;

    /// Cheap liveness check used by the readiness endpoint.
    async fn ping(&self) -> StoreResult<()>;
}
