//! Upload, wait for processing, generate.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GeminiError, GeminiResult};
use crate::service::AnalysisService;
use crate::types::{FileState, RemoteFile};

/// Step the analyzer is about to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Uploading,
    Polling,
    Generating,
}

/// Outcome of one analysis.
///
/// `asset` is set whenever the upload succeeded, whatever happened after,
/// so the caller can always delete what it created.
#[derive(Debug)]
pub struct AnalysisReport {
    pub asset: Option<String>,
    pub result: GeminiResult<String>,
}

/// Drives one video through an [`AnalysisService`].
pub struct Analyzer<S> {
    service: S,
    poll_interval: Duration,
    max_processing_wait: Duration,
}

impl<S: AnalysisService> Analyzer<S> {
    pub fn new(service: S, poll_interval: Duration, max_processing_wait: Duration) -> Self {
        Self {
            service,
            poll_interval,
            max_processing_wait,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Analyze the video at `path` with `prompt`.
    ///
    /// `on_stage` is called before each step starts. Cancelling `cancel`
    /// stops the upload, the polling or the generation, whichever is
    /// running, with [`GeminiError::Cancelled`].
    pub async fn analyze<F>(
        &self,
        path: &Path,
        prompt: &str,
        cancel: &CancellationToken,
        mut on_stage: F,
    ) -> AnalysisReport
    where
        F: FnMut(Stage) + Send,
    {
        on_stage(Stage::Uploading);
        let mime_type = mime_type_for(path);
        let uploaded = cancellable(cancel, async {
            self.service
                .upload(path, &mime_type)
                .await
                .map_err(|e| GeminiError::Upload(e.to_string()))
        })
        .await;
        let file = match uploaded {
            Ok(file) => file,
            Err(e) => {
                return AnalysisReport {
                    asset: None,
                    result: Err(e),
                }
            }
        };

        let asset = Some(file.name.clone());
        let result = self.process(file, prompt, cancel, &mut on_stage).await;
        AnalysisReport { asset, result }
    }

    async fn process<F>(
        &self,
        file: RemoteFile,
        prompt: &str,
        cancel: &CancellationToken,
        on_stage: &mut F,
    ) -> GeminiResult<String>
    where
        F: FnMut(Stage) + Send,
    {
        on_stage(Stage::Polling);
        let file = self.wait_until_active(file, cancel).await?;

        on_stage(Stage::Generating);
        let response = cancellable(cancel, async {
            self.service
                .generate(&file, prompt)
                .await
                .map_err(|e| GeminiError::Generate(e.to_string()))
        })
        .await?;

        let text = response.text().ok_or(GeminiError::EmptyGeneration)?;
        info!("Generated {} characters for {}", text.len(), file.name);
        Ok(text)
    }

    async fn wait_until_active(
        &self,
        mut file: RemoteFile,
        cancel: &CancellationToken,
    ) -> GeminiResult<RemoteFile> {
        let deadline = Instant::now() + self.max_processing_wait;

        loop {
            match file.state {
                FileState::Active => return Ok(file),
                FileState::Failed => {
                    return Err(GeminiError::RemoteProcessing(file.failure_reason()))
                }
                FileState::Processing | FileState::Unspecified => {}
            }

            if Instant::now() >= deadline {
                return Err(GeminiError::ProcessingTimeout(self.max_processing_wait));
            }

            debug!("{} is {:?}, polling again", file.name, file.state);
            file = cancellable(cancel, async {
                tokio::time::sleep(self.poll_interval).await;
                self.service
                    .get_file(&file.name)
                    .await
                    .map_err(|e| GeminiError::Status(e.to_string()))
            })
            .await?;
        }
    }

    /// Delete a remote file, logging instead of failing.
    ///
    /// Returns whether the delete call succeeded.
    pub async fn delete(&self, name: &str) -> bool {
        match self.service.delete(name).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to delete remote file {}: {}", name, e);
                false
            }
        }
    }
}

/// Run `step` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    step: impl Future<Output = GeminiResult<T>>,
) -> GeminiResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GeminiError::Cancelled),
        result = step => result,
    }
}

/// MIME type from the file extension, defaulting to MP4.
pub fn mime_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .filter(|m| m.type_() == mime_guess::mime::VIDEO)
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "video/mp4".to_string())
}
