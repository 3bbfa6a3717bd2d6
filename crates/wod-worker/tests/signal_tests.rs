//! SIGTERM starts a graceful shutdown.

#![cfg(unix)]

use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};

use wod_worker::shutdown_signal;

#[tokio::test]
async fn test_sigterm_resolves_shutdown_signal() {
    // Keeps the default action (exit) away from this test process
    let _guard = signal(SignalKind::terminate()).unwrap();

    let waiting = tokio::spawn(shutdown_signal());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = std::process::Command::new("kill")
        .arg("-TERM")
        .arg(std::process::id().to_string())
        .status()
        .unwrap();
    assert!(status.success());

    tokio::time::timeout(Duration::from_secs(2), waiting)
        .await
        .expect("SIGTERM did not resolve the shutdown signal")
        .unwrap();
}
