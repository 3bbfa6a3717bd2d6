//! Runs long-lived components on one cancellation token.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long components get to stop once shutdown starts
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(45),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            shutdown_grace: std::env::var("SHUTDOWN_GRACE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Self::default().shutdown_grace),
        }
    }
}

/// Owns a set of components that live and die together.
///
/// When any component returns, successfully or not, the shared token is
/// cancelled and the others are asked to stop.
pub struct Supervisor {
    shutdown: CancellationToken,
    grace: Duration,
    components: Vec<(&'static str, JoinHandle<anyhow::Result<()>>)>,
}

impl Supervisor {
    pub fn new(shutdown: CancellationToken, grace: Duration) -> Self {
        Self {
            shutdown,
            grace,
            components: Vec::new(),
        }
    }

    /// Token the components should watch.
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start a component.
    pub fn spawn<Fut>(&mut self, name: &'static str, component: Fut)
    where
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            // Fires on return and on panic alike
            let _stop_others = shutdown.drop_guard();
            let result = component.await;
            match &result {
                Ok(()) => info!("{} stopped", name),
                Err(e) => error!("{} failed: {:#}", name, e),
            }
            result
        });
        self.components.push((name, handle));
    }

    /// Wait for shutdown, then for every component within the grace period.
    ///
    /// Components still running when the grace period ends are aborted.
    /// Returns an error naming every component that failed.
    pub async fn wait(self) -> anyhow::Result<()> {
        self.shutdown.cancelled().await;
        info!(
            "Shutting down {} components (grace {:?})",
            self.components.len(),
            self.grace
        );

        let deadline = Instant::now() + self.grace;
        let mut failed = Vec::new();

        for (name, mut handle) in self.components {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(_))) => failed.push(name),
                Ok(Err(e)) => {
                    error!("{} panicked: {}", name, e);
                    failed.push(name);
                }
                Err(_) => {
                    warn!("{} did not stop within the grace period, aborting", name);
                    handle.abort();
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("components failed: {}", failed.join(", "))
        }
    }
}
