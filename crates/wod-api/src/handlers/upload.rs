//! Video upload handler.

use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use scopeguard::ScopeGuard;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use wod_models::{sanitize_filename, sanitize_path_component};
use wod_queue::{AnalyzeVideoTask, TASK_TYPE_VIDEO_ANALYSIS};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

pub const UPLOAD_ACCEPTED: &str = "File uploaded and analysis started";

/// Body of a 202 upload response.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub task_id: String,
    pub session_id: String,
}

/// Accept a `session_id` + `file` multipart upload and queue it for analysis.
///
/// The file is streamed to disk and is removed again on any failure before
/// the task is enqueued.
pub async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    tokio::fs::create_dir_all(&state.config.upload_dir).await?;
    let upload_dir = tokio::fs::canonicalize(&state.config.upload_dir).await?;
    let upload_id = Uuid::new_v4().simple().to_string();

    let mut session_id: Option<String> = None;
    let mut received = None;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("session_id") => session_id = Some(field.text().await?),
            Some("file") => {
                if received.is_some() {
                    return Err(ApiError::bad_request("only one file may be uploaded"));
                }
                let original_name = field.file_name().unwrap_or("video").to_string();
                let partial = upload_dir.join(format!(".{}.part", upload_id));
                // Removed on every early return below
                let guard = scopeguard::guard(partial, remove_quietly);
                let bytes = write_field(&mut field, &guard).await?;
                received = Some((guard, original_name, bytes));
            }
            _ => {}
        }
    }

    let session_id = session_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("session_id is required"))?;
    let (partial, original_name, bytes) =
        received.ok_or_else(|| ApiError::bad_request("file is required"))?;

    let file_name = format!(
        "{}_{}_{}",
        sanitize_path_component(&session_id, "session"),
        upload_id,
        sanitize_filename(&original_name)
    );
    let scratch = upload_dir.join(file_name);
    tokio::fs::rename(&*partial, &scratch).await?;
    let _ = ScopeGuard::into_inner(partial);
    let scratch = scopeguard::guard(scratch, remove_quietly);

    let task = AnalyzeVideoTask::new(session_id.clone(), scratch.to_string_lossy());
    let task_id = state.queue.enqueue(&task).await?;

    // Queued: the worker owns the file from here on
    let scratch = ScopeGuard::into_inner(scratch);

    metrics::record_task_enqueued(TASK_TYPE_VIDEO_ANALYSIS);
    metrics::record_upload_bytes(bytes);
    info!(
        task_id = %task_id,
        session_id = %session_id,
        file = %scratch.display(),
        original_name = %original_name,
        bytes,
        "Upload accepted, analysis queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            message: UPLOAD_ACCEPTED.to_string(),
            task_id: task_id.to_string(),
            session_id,
        }),
    ))
}

/// Stream a multipart field to `path` chunk by chunk.
async fn write_field(field: &mut Field<'_>, path: &Path) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(written)
}

fn remove_quietly(path: PathBuf) {
    if let Err(e) = std::fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove upload {}: {}", path.display(), e);
        }
    }
}
