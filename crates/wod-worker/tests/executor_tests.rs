mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use wod_models::AnalysisStatus;
use wod_store::MemoryResultStore;
use wod_worker::{settle, AnalysisHandler, TaskExecutor, TaskOutcome, WorkerConfig};

use wod_gemini::FileState;

use common::{delivery, raw_delivery, scratch, FakeFactory, FakeQueue, Script};

fn test_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 2,
        shutdown_timeout: Duration::from_secs(5),
        consume_block: Duration::from_millis(10),
        ..WorkerConfig::default()
    }
}

#[tokio::test]
async fn test_settle_done_acks() {
    let queue = FakeQueue::default();
    let d = raw_delivery("1-0", Vec::new());

    settle(&queue, &d, &TaskOutcome::Done).await;

    assert_eq!(*queue.acked.lock().unwrap(), vec!["1-0".to_string()]);
    assert!(queue.dead.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_settle_retry_schedules_until_exhausted() {
    let queue = FakeQueue::with(Vec::new());
    let mut d = raw_delivery("1-0", Vec::new());

    settle(&queue, &d, &TaskOutcome::Retry("upload failed".into())).await;
    assert_eq!(queue.retried.lock().unwrap().len(), 1);

    d.attempt = 3;
    settle(&queue, &d, &TaskOutcome::Retry("upload failed".into())).await;
    assert_eq!(queue.retried.lock().unwrap().len(), 1);
    assert_eq!(
        *queue.dead.lock().unwrap(),
        vec![("1-0".to_string(), "upload failed".to_string())]
    );
}

#[tokio::test]
async fn test_settle_skip_dead_letters() {
    let queue = FakeQueue::default();
    let d = raw_delivery("7-0", b"garbage".to_vec());

    settle(&queue, &d, &TaskOutcome::Skip("malformed".into())).await;

    assert!(queue.acked.lock().unwrap().is_empty());
    assert_eq!(queue.dead.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_settle_interrupted_releases() {
    let queue = FakeQueue::default();
    let d = raw_delivery("4-0", Vec::new());

    settle(&queue, &d, &TaskOutcome::Interrupted).await;

    assert_eq!(*queue.released.lock().unwrap(), vec!["4-0".to_string()]);
    assert!(queue.acked.lock().unwrap().is_empty());
    assert!(queue.retried.lock().unwrap().is_empty());
    assert!(queue.dead.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_run_processes_deliveries_and_stops_on_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let ok = scratch(dir.path(), "s1_1_squat.mp4");
    let failing = scratch(dir.path(), "s2_1_upload-fails.mp4");

    let queue = Arc::new(FakeQueue::with(vec![
        delivery("1-0", "s1", &ok),
        delivery("2-0", "s2", &failing),
        raw_delivery("3-0", b"{}".to_vec()),
    ]));
    let store = Arc::new(MemoryResultStore::new());
    let handler = AnalysisHandler::new(FakeFactory::new(Script::default()), store.clone(), "prompt")
        .with_polling(Duration::from_millis(1), Duration::from_millis(200));
    let executor = TaskExecutor::new(test_config(), queue.clone(), handler);

    let shutdown = CancellationToken::new();
    let running = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { executor.run(shutdown).await }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.settled() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("deliveries were not settled in time");

    shutdown.cancel();
    running.await.unwrap().unwrap();

    assert_eq!(*queue.acked.lock().unwrap(), vec!["1-0".to_string()]);
    assert_eq!(queue.retried.lock().unwrap()[0].0, "2-0");
    assert_eq!(queue.dead.lock().unwrap()[0].0, "3-0");

    let mut rows = store.all().await;
    rows.sort_by(|a, b| a.session_id.cmp(&b.session_id));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].status, AnalysisStatus::Completed);
    assert_eq!(rows[1].status, AnalysisStatus::Failed);
    assert!(!ok.exists());
    assert!(!failing.exists());
}

#[tokio::test]
async fn test_run_returns_promptly_when_idle() {
    let queue = Arc::new(FakeQueue::with(Vec::new()));
    let store = Arc::new(MemoryResultStore::new());
    let handler = AnalysisHandler::new(FakeFactory::new(Script::default()), store, "prompt");
    let executor = TaskExecutor::new(test_config(), queue, handler);

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(2), executor.run(shutdown))
        .await
        .expect("executor did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_interrupts_stuck_task_and_deletes_remote() {
    let dir = tempfile::tempdir().unwrap();
    let video = scratch(dir.path(), "s1_1_squat.mp4");

    let queue = Arc::new(FakeQueue::with(vec![delivery("1-0", "s1", &video)]));
    let store = Arc::new(MemoryResultStore::new());
    let factory = FakeFactory::new(Script {
        final_state: FileState::Processing,
        ..Script::default()
    });
    let calls = Arc::clone(&factory.calls);
    let handler = AnalysisHandler::new(factory, store.clone(), "prompt")
        .with_polling(Duration::from_millis(5), Duration::from_secs(60));
    let config = WorkerConfig {
        shutdown_timeout: Duration::from_millis(200),
        cleanup_timeout: Duration::from_secs(2),
        ..test_config()
    };
    let executor = TaskExecutor::new(config, queue.clone(), handler);

    let shutdown = CancellationToken::new();
    let running = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { executor.run(shutdown).await }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while calls.uploads() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task never started");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("executor did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(calls.deletes(), vec!["files/fake-1".to_string()]);
    assert!(store.all().await.is_empty());
    assert!(video.exists());
    assert_eq!(*queue.released.lock().unwrap(), vec!["1-0".to_string()]);
    assert_eq!(queue.settled(), 1);
}

#[tokio::test]
async fn test_read_finished_after_shutdown_is_released() {
    let dir = tempfile::tempdir().unwrap();
    let video = scratch(dir.path(), "s1_1_squat.mp4");

    let queue = Arc::new(FakeQueue::with(vec![delivery("1-0", "s1", &video)]));
    let store = Arc::new(MemoryResultStore::new());
    let factory = FakeFactory::new(Script::default());
    let calls = Arc::clone(&factory.calls);
    let handler = AnalysisHandler::new(factory, store.clone(), "prompt");
    let executor = TaskExecutor::new(test_config(), queue.clone(), handler);

    let shutdown = CancellationToken::new();
    queue.cancel_during_next_read(shutdown.clone());

    tokio::time::timeout(Duration::from_secs(2), executor.run(shutdown))
        .await
        .expect("executor did not stop")
        .unwrap();

    assert_eq!(*queue.released.lock().unwrap(), vec!["1-0".to_string()]);
    assert_eq!(calls.uploads(), 0);
    assert!(store.all().await.is_empty());
    assert!(video.exists());
}
