//! Fakes shared by the worker tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use wod_gemini::{
    AnalysisService, FileState, GeminiError, GeminiResult, GenerateContentResponse, RemoteFile,
    ServiceFactory,
};
use wod_models::TaskId;
use wod_queue::{
    AnalyzeVideoTask, Delivery, QueueResult, RetryDecision, TaskConsumer,
    TASK_TYPE_VIDEO_ANALYSIS,
};

/// How the fake service behaves.
#[derive(Debug, Clone)]
pub struct Script {
    pub upload_error: bool,
    pub final_state: FileState,
    /// `None` produces a response without candidates.
    pub generation: Option<String>,
    pub generate_error: bool,
    pub delete_error: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            upload_error: false,
            final_state: FileState::Active,
            generation: Some("Good squat depth; knees drift inward.".to_string()),
            generate_error: false,
            delete_error: false,
        }
    }
}

#[derive(Default)]
pub struct Calls {
    pub creates: AtomicUsize,
    pub uploads: AtomicUsize,
    pub deletes: Mutex<Vec<String>>,
}

impl Calls {
    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

pub struct FakeService {
    script: Script,
    calls: Arc<Calls>,
}

fn remote(state: FileState) -> RemoteFile {
    RemoteFile {
        name: "files/fake-1".to_string(),
        uri: "https://example.test/files/fake-1".to_string(),
        mime_type: "video/mp4".to_string(),
        state,
        error: None,
    }
}

#[async_trait]
impl AnalysisService for FakeService {
    async fn upload(&self, path: &Path, _mime_type: &str) -> GeminiResult<RemoteFile> {
        self.calls.uploads.fetch_add(1, Ordering::SeqCst);
        let forced = path
            .to_str()
            .map(|p| p.contains("upload-fails"))
            .unwrap_or(false);
        if self.script.upload_error || forced {
            return Err(GeminiError::Api {
                status: 503,
                body: "connection reset".to_string(),
            });
        }
        Ok(remote(FileState::Processing))
    }

    async fn get_file(&self, _name: &str) -> GeminiResult<RemoteFile> {
        Ok(remote(self.script.final_state))
    }

    async fn generate(
        &self,
        _file: &RemoteFile,
        _prompt: &str,
    ) -> GeminiResult<GenerateContentResponse> {
        if self.script.generate_error {
            return Err(GeminiError::Api {
                status: 500,
                body: "internal".to_string(),
            });
        }

        let value = match &self.script.generation {
            Some(text) => serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": text }] } }]
            }),
            None => serde_json::json!({ "candidates": [] }),
        };
        Ok(serde_json::from_value(value).unwrap())
    }

    async fn delete(&self, name: &str) -> GeminiResult<()> {
        self.calls.deletes.lock().unwrap().push(name.to_string());
        if self.script.delete_error {
            return Err(GeminiError::Api {
                status: 500,
                body: "internal".to_string(),
            });
        }
        Ok(())
    }
}

pub struct FakeFactory {
    pub script: Script,
    pub calls: Arc<Calls>,
    pub fail_create: bool,
}

impl FakeFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: Arc::new(Calls::default()),
            fail_create: false,
        }
    }
}

impl ServiceFactory for FakeFactory {
    type Service = FakeService;

    fn create(&self) -> GeminiResult<FakeService> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(GeminiError::config("GEMINI_API_KEY is not set"));
        }
        Ok(FakeService {
            script: self.script.clone(),
            calls: Arc::clone(&self.calls),
        })
    }
}

/// Delivery for a well-formed task.
pub fn delivery(message_id: &str, session_id: &str, file_path: &Path) -> Delivery {
    let payload = AnalyzeVideoTask::new(session_id, file_path.to_string_lossy())
        .to_payload()
        .unwrap();
    raw_delivery(message_id, payload.into_bytes())
}

pub fn raw_delivery(message_id: &str, payload: Vec<u8>) -> Delivery {
    Delivery {
        message_id: message_id.to_string(),
        task_id: TaskId::new(),
        task_type: TASK_TYPE_VIDEO_ANALYSIS.to_string(),
        attempt: 0,
        payload,
    }
}

/// Write a scratch video into `dir`.
pub fn scratch(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"fake video bytes").unwrap();
    path
}

/// In-memory queue recording how deliveries were settled.
#[derive(Default)]
pub struct FakeQueue {
    pub pending: Mutex<VecDeque<Delivery>>,
    pub acked: Mutex<Vec<String>>,
    pub retried: Mutex<Vec<(String, String)>>,
    pub dead: Mutex<Vec<(String, String)>>,
    pub released: Mutex<Vec<String>>,
    pub max_retries: u32,
    /// Cancelled from inside the next read, after entries were handed out.
    cancel_during_read: Mutex<Option<CancellationToken>>,
}

impl FakeQueue {
    pub fn with(deliveries: Vec<Delivery>) -> Self {
        Self {
            pending: Mutex::new(deliveries.into()),
            max_retries: 3,
            ..Default::default()
        }
    }

    pub fn cancel_during_next_read(&self, token: CancellationToken) {
        *self.cancel_during_read.lock().unwrap() = Some(token);
    }

    pub fn settled(&self) -> usize {
        self.acked.lock().unwrap().len()
            + self.retried.lock().unwrap().len()
            + self.dead.lock().unwrap().len()
            + self.released.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskConsumer for FakeQueue {
    async fn init(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn consume(
        &self,
        _consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let batch: Vec<Delivery> = {
            let mut pending = self.pending.lock().unwrap();
            let n = count.min(pending.len());
            pending.drain(..n).collect()
        };
        if let Some(token) = self.cancel_during_read.lock().unwrap().take() {
            token.cancel();
        }
        if batch.is_empty() {
            tokio::time::sleep(Duration::from_millis(block_ms.min(10))).await;
        }
        Ok(batch)
    }

    async fn claim_stale(
        &self,
        _consumer_name: &str,
        _min_idle: Duration,
        _count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        Ok(Vec::new())
    }

    async fn promote_due(&self, _limit: usize) -> QueueResult<usize> {
        Ok(0)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        self.acked.lock().unwrap().push(message_id.to_string());
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, error: &str) -> QueueResult<RetryDecision> {
        if delivery.attempt >= self.max_retries {
            self.dead
                .lock()
                .unwrap()
                .push((delivery.message_id.clone(), error.to_string()));
            return Ok(RetryDecision::Exhausted);
        }
        self.retried
            .lock()
            .unwrap()
            .push((delivery.message_id.clone(), error.to_string()));
        Ok(RetryDecision::Scheduled {
            attempt: delivery.attempt + 1,
            delay: Duration::from_secs(10),
        })
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        self.dead
            .lock()
            .unwrap()
            .push((delivery.message_id.clone(), error.to_string()));
        Ok(())
    }

    async fn release(&self, delivery: &Delivery) -> QueueResult<()> {
        self.released
            .lock()
            .unwrap()
            .push(delivery.message_id.clone());
        Ok(())
    }
}
