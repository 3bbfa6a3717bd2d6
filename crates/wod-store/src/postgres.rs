//! PostgreSQL result store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use wod_models::{AnalysisResult, AnalysisStatus, NewAnalysisResult};

use crate::error::{StoreError, StoreResult};
use crate::ResultStore;

/// Result store backed by the `analysis_results` table.
#[derive(Clone)]
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn insert(&self, result: NewAnalysisResult) -> StoreResult<AnalysisResult> {
        let row = sqlx::query_as::<_, ResultRow>(
            r#"
            INSERT INTO analysis_results (session_id, status, output)
            VALUES ($1, $2, $3)
            RETURNING id, session_id, status, output, created_at, updated_at
            "#,
        )
        .bind(&result.session_id)
        .bind(result.status.as_str())
        .bind(&result.output)
        .fetch_one(&self.pool)
        .await?;

        debug!(id = row.id, session_id = %row.session_id, status = %row.status, "Inserted analysis result");
        row.try_into()
    }

    async fn list_by_session(&self, session_id: &str) -> StoreResult<Vec<AnalysisResult>> {
        sqlx::query_as::<_, ResultRow>(
            r#"
            SELECT id, session_id, status, output, created_at, updated_at
            FROM analysis_results
            WHERE session_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(AnalysisResult::try_from)
        .collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Database row representation
#[derive(sqlx::FromRow)]
struct ResultRow {
    id: i64,
    session_id: String,
    status: String,
    output: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ResultRow> for AnalysisResult {
    type Error = StoreError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let status: AnalysisStatus = row.status.parse().map_err(|e: wod_models::ParseStatusError| {
            StoreError::CorruptRow {
                id: row.id,
                reason: e.to_string(),
            }
        })?;

        Ok(AnalysisResult {
            id: row.id,
            session_id: row.session_id,
            status,
            output: row.output,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
