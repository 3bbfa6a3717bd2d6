//! Release of per-task resources.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use wod_gemini::{AnalysisService, Analyzer};

use crate::metrics;

/// What a [`CleanupScope::release`] call managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    /// The scratch file is gone (removed now or already absent). Always
    /// false when the scope was told to keep it.
    pub scratch_removed: bool,
    /// `None` when no remote file was ever created.
    pub remote_deleted: Option<bool>,
}

/// Owns the scratch file and, once known, the remote file of one task.
///
/// `release` consumes the scope, so each resource is released at most once.
#[derive(Debug)]
#[must_use = "a cleanup scope does nothing until released"]
pub struct CleanupScope {
    scratch: PathBuf,
    keep_scratch: bool,
    remote: Option<String>,
}

impl CleanupScope {
    pub fn new(scratch: impl Into<PathBuf>) -> Self {
        Self {
            scratch: scratch.into(),
            keep_scratch: false,
            remote: None,
        }
    }

    /// Record the remote file created for this task.
    pub fn track_remote(&mut self, name: impl Into<String>) {
        self.remote = Some(name.into());
    }

    /// Leave the scratch file in place for a later delivery of the same task.
    pub fn keep_scratch(&mut self) {
        self.keep_scratch = true;
    }

    /// Remove the scratch file and delete the remote file, concurrently.
    ///
    /// Failures are logged and counted, never returned.
    pub async fn release<S: AnalysisService>(self, analyzer: &Analyzer<S>) -> CleanupReport {
        let remote = self.remote;
        let keep_scratch = self.keep_scratch;
        let scratch = self.scratch;
        let remove_local = async {
            if keep_scratch {
                false
            } else {
                remove_scratch(&scratch).await
            }
        };
        let delete_remote = async {
            match remote.as_deref() {
                Some(name) => Some(analyzer.delete(name).await),
                None => None,
            }
        };

        let (scratch_removed, remote_deleted) =
            tokio::join!(remove_local, delete_remote);

        if remote_deleted == Some(false) {
            metrics::record_cleanup_failure("remote_file");
        }

        CleanupReport {
            scratch_removed,
            remote_deleted,
        }
    }
}

/// Remove a scratch file; one that is already gone counts as removed.
pub async fn remove_scratch(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed scratch file {}", path.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Failed to remove scratch file {}: {}", path.display(), e);
            metrics::record_cleanup_failure("scratch_file");
            false
        }
    }
}
