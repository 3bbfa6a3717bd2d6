//! Gemini REST client.

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Response};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::GeminiConfig;
use crate::error::{GeminiError, GeminiResult};
use crate::service::{AnalysisService, ServiceFactory};
use crate::types::{GenerateContentRequest, GenerateContentResponse, RemoteFile, UploadResponse};

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// Client for the Gemini file and generation endpoints.
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    /// Create a new Gemini client.
    pub fn new(config: GeminiConfig) -> GeminiResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(GeminiError::config("GEMINI_API_KEY is not set"));
        }

        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(GeminiError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> GeminiResult<Self> {
        Self::new(GeminiConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

/// Pass successful responses through; turn everything else into an API error.
async fn check(response: Response) -> GeminiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(GeminiError::Api {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl AnalysisService for GeminiClient {
    async fn upload(&self, path: &Path, mime_type: &str) -> GeminiResult<RemoteFile> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let display_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload");

        debug!("Starting resumable upload of {} ({} bytes)", display_name, size);

        // Resumable protocol: one request to open a session, one to send the bytes
        let start = self
            .http
            .post(self.url("upload/v1beta/files"))
            .header(API_KEY_HEADER, &self.config.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size)
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let start = check(start).await?;

        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| GeminiError::invalid_response("upload session URL missing"))?;

        let response = self
            .http
            .post(&upload_url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .header(CONTENT_LENGTH, size)
            .header(CONTENT_TYPE, mime_type)
            .header("X-Goog-Upload-Offset", 0)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;

        let uploaded: UploadResponse = check(response).await?.json().await?;
        info!(
            "Uploaded {} as {} ({:?})",
            display_name, uploaded.file.name, uploaded.file.state
        );
        Ok(uploaded.file)
    }

    async fn get_file(&self, name: &str) -> GeminiResult<RemoteFile> {
        let response = self
            .http
            .get(self.url(&format!("v1beta/{}", name)))
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn generate(
        &self,
        file: &RemoteFile,
        prompt: &str,
    ) -> GeminiResult<GenerateContentResponse> {
        let url = self.url(&format!("v1beta/models/{}:generateContent", self.config.model));
        debug!("Requesting generation from {} for {}", self.config.model, file.name);

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&GenerateContentRequest::for_file(file, prompt))
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn delete(&self, name: &str) -> GeminiResult<()> {
        let response = self
            .http
            .delete(self.url(&format!("v1beta/{}", name)))
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await?;

        match check(response).await {
            Ok(_) => {
                debug!("Deleted remote file {}", name);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("Remote file {} already gone", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Factory producing a fresh [`GeminiClient`] per task.
#[derive(Debug, Clone)]
pub struct GeminiFactory {
    config: GeminiConfig,
}

impl GeminiFactory {
    pub fn new(config: GeminiConfig) -> Self {
        Self { config }
    }
}

impl ServiceFactory for GeminiFactory {
    type Service = GeminiClient;

    fn create(&self) -> GeminiResult<GeminiClient> {
        GeminiClient::new(self.config.clone())
    }
}
