//! Capability traits for the remote analysis service.

use std::path::Path;

use async_trait::async_trait;

use crate::error::GeminiResult;
use crate::types::{GenerateContentResponse, RemoteFile};

/// Operations the worker needs from a multimodal analysis service.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Upload a local file, streaming it from disk.
    async fn upload(&self, path: &Path, mime_type: &str) -> GeminiResult<RemoteFile>;

    /// Look up the current state of an uploaded file.
    async fn get_file(&self, name: &str) -> GeminiResult<RemoteFile>;

    /// Run the prompt against an active file.
    async fn generate(
        &self,
        file: &RemoteFile,
        prompt: &str,
    ) -> GeminiResult<GenerateContentResponse>;

    /// Delete an uploaded file. Deleting a file that no longer exists succeeds.
    async fn delete(&self, name: &str) -> GeminiResult<()>;
}

/// Builds one service client per task execution.
pub trait ServiceFactory: Send + Sync {
    type Service: AnalysisService + 'static;

    fn create(&self) -> GeminiResult<Self::Service>;
}
