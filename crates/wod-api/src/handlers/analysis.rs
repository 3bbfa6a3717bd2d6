//! Analysis result query handler.

use axum::extract::{Path, State};
use axum::Json;
use tracing::debug;

use wod_models::AnalysisResult;

use crate::error::ApiResult;
use crate::state::AppState;

/// List every recorded analysis for a session, oldest first.
///
/// Unknown sessions yield an empty list rather than 404.
pub async fn get_session_analysis(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<AnalysisResult>>> {
    let results = state.store.list_by_session(&session_id).await?;
    debug!(session_id = %session_id, count = results.len(), "Listed analysis results");
    Ok(Json(results))
}
