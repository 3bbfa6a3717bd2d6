//! Upload, analysis and lookup wired together in one process.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use wod_api::{create_router, ApiConfig, AppState};
use wod_gemini::{
    AnalysisService, FileState, GeminiResult, GenerateContentResponse, RemoteFile, ServiceFactory,
};
use wod_models::{AnalysisResult, AnalysisStatus, TaskId};
use wod_queue::{
    AnalyzeVideoTask, Delivery, QueueResult, RetryDecision, TaskConsumer, TaskProducer,
    TASK_TYPE_VIDEO_ANALYSIS,
};
use wod_store::MemoryResultStore;
use wod_worker::{AnalysisHandler, TaskExecutor, WorkerConfig};

const BOUNDARY: &str = "wod-e2e-boundary";
const FEEDBACK: &str = "Depth is good; brace harder before the descent.";

/// Both ends of the queue in memory.
#[derive(Default)]
struct MemoryQueue {
    next_id: AtomicU64,
    pending: Mutex<Vec<Delivery>>,
    acked: Mutex<Vec<String>>,
}

impl MemoryQueue {
    fn acked(&self) -> usize {
        self.acked.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskProducer for MemoryQueue {
    async fn enqueue(&self, task: &AnalyzeVideoTask) -> QueueResult<TaskId> {
        let task_id = TaskId::new();
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().push(Delivery {
            message_id: format!("{}-0", n + 1),
            task_id: task_id.clone(),
            task_type: TASK_TYPE_VIDEO_ANALYSIS.to_string(),
            attempt: 0,
            payload: task.to_payload()?.into_bytes(),
        });
        Ok(task_id)
    }

    async fn depth(&self) -> QueueResult<u64> {
        Ok(self.pending.lock().unwrap().len() as u64)
    }
}

#[async_trait]
impl TaskConsumer for MemoryQueue {
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

    async fn retry(&self, _delivery: &Delivery, error: &str) -> QueueResult<RetryDecision> {
        panic!("unexpected retry: {}", error)
    }

    async fn dead_letter(&self, _delivery: &Delivery, error: &str) -> QueueResult<()> {
        panic!("unexpected dead letter: {}", error)
    }

    async fn release(&self, delivery: &Delivery) -> QueueResult<()> {
        self.pending.lock().unwrap().push(delivery.clone());
        Ok(())
    }
}

/// Remote service that is ready as soon as the upload lands.
#[derive(Clone, Default)]
struct InstantService {
    deleted: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl AnalysisService for InstantService {
    async fn upload(&self, path: &Path, mime_type: &str) -> GeminiResult<RemoteFile> {
        assert!(path.exists());
        Ok(RemoteFile {
            name: "files/e2e".to_string(),
            uri: "https://example.test/files/e2e".to_string(),
            mime_type: mime_type.to_string(),
            state: FileState::Active,
            error: None,
        })
    }

    async fn get_file(&self, _name: &str) -> GeminiResult<RemoteFile> {
        unreachable!("file is active after upload")
    }

    async fn generate(
        &self,
        _file: &RemoteFile,
        _prompt: &str,
    ) -> GeminiResult<GenerateContentResponse> {
        Ok(serde_json::from_value(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": FEEDBACK }] } }]
        }))
        .unwrap())
    }

    async fn delete(&self, name: &str) -> GeminiResult<()> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

impl ServiceFactory for InstantService {
    type Service = InstantService;

    fn create(&self) -> GeminiResult<InstantService> {
        Ok(self.clone())
    }
}

fn upload_request(session_id: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"session_id\"\r\n\r\n{s}\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
         Content-Type: video/mp4\r\n\r\n",
        b = BOUNDARY,
        s = session_id,
        f = file_name
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/v1/upload")
        .header(header::CONTENT_LENGTH, body.len())
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_uploaded_video_is_analyzed_and_listed() {
    let upload_dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(MemoryQueue::default());
    let store = Arc::new(MemoryResultStore::new());
    let service = InstantService::default();
    let deleted = Arc::clone(&service.deleted);

    let config = ApiConfig {
        upload_dir: upload_dir.path().to_path_buf(),
        ..ApiConfig::default()
    };
    let app = create_router(AppState::new(config, queue.clone(), store.clone()), None);

    let response = app
        .clone()
        .oneshot(upload_request("s1", "squat.mp4", b"fake video bytes"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let handler = AnalysisHandler::new(service, store.clone(), "analyze this lift");
    let worker_config = WorkerConfig {
        concurrency: 1,
        consume_block: Duration::from_millis(10),
        ..WorkerConfig::default()
    };
    let executor = TaskExecutor::new(worker_config, queue.clone(), handler);
    let shutdown = CancellationToken::new();
    let running = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { executor.run(shutdown).await }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.acked() < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task was not completed in time");
    shutdown.cancel();
    running.await.unwrap().unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/analysis/s1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let rows: Vec<AnalysisResult> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].session_id, "s1");
    assert_eq!(rows[0].status, AnalysisStatus::Completed);
    assert_eq!(rows[0].output, FEEDBACK);

    assert_eq!(*deleted.lock().unwrap(), vec!["files/e2e".to_string()]);
    assert_eq!(std::fs::read_dir(upload_dir.path()).unwrap().count(), 0);
}
