//! In-memory result store for tests and local runs without PostgreSQL.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use wod_models::{AnalysisResult, NewAnalysisResult};

use crate::error::{StoreError, StoreResult};
use crate::ResultStore;

#[derive(Default)]
struct Inner {
    rows: Vec<AnalysisResult>,
    next_id: i64,
    unavailable: bool,
}

/// Result store holding rows in a vector.
#[derive(Default)]
pub struct MemoryResultStore {
    inner: Mutex<Inner>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, to exercise store outages.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.unavailable = unavailable;
    }

    /// Snapshot of every stored row.
    pub async fn all(&self) -> Vec<AnalysisResult> {
        self.inner.lock().await.rows.clone()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn insert(&self, result: NewAnalysisResult) -> StoreResult<AnalysisResult> {
        let mut inner = self.inner.lock().await;
        if inner.unavailable {
            return Err(StoreError::unavailable("memory store marked unavailable"));
        }

        inner.next_id += 1;
        let now = Utc::now();
        let row = AnalysisResult {
            id: inner.next_id,
            session_id: result.session_id,
            status: result.status,
            output: result.output,
            created_at: now,
            updated_at: now,
        };
        inner.rows.push(row.clone());
        Ok(row)
    }

    async fn list_by_session(&self, session_id: &str) -> StoreResult<Vec<AnalysisResult>> {
        let inner = self.inner.lock().await;
        if inner.unavailable {
            return Err(StoreError::unavailable("memory store marked unavailable"));
        }

        Ok(inner
            .rows
            .iter()
            .filter(|row| row.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        if self.inner.lock().await.unavailable {
            return Err(StoreError::unavailable("memory store marked unavailable"));
        }
        Ok(())
    }
}
