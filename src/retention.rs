//! Reclaiming workspaces: a delayed one-shot delete per job, and a periodic
//! age-based sweep per pool.
//!
//! Both work on filesystem entries only and treat "already gone" as success,
//! so they can race each other freely.

use crate::config::Settings;
use crate::error::CleanupFailed;
use crate::workspace::Pool;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Handle to a scheduled workspace deletion.
///
/// Dropping the handle leaves the deletion scheduled.
#[derive(Debug)]
pub struct CleanupHandle {
    path: PathBuf,
    handle: JoinHandle<()>,
}

impl CleanupHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cancel the deletion if it has not started yet.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the deletion to run (or for the cancellation to land).
    pub async fn wait(self) {
        let _ = self.handle.await;
    }
}

/// Delete `workspace` after `grace`. Failures are logged, never returned.
pub fn schedule_cleanup(workspace: PathBuf, grace: Duration) -> CleanupHandle {
    debug!(path = ?workspace, grace = ?grace, "Scheduling workspace cleanup");
    let path = workspace.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        let target = workspace.clone();
        match tokio::task::spawn_blocking(move || remove_entry(&target)).await {
            Ok(Ok(true)) => info!(path = ?workspace, "Workspace reclaimed"),
            Ok(Ok(false)) => debug!(path = ?workspace, "Workspace already gone"),
            Ok(Err(e)) => warn!(error = %e, "Workspace cleanup failed"),
            Err(e) => warn!(path = ?workspace, error = %e, "Workspace cleanup task failed"),
        }
    });
    CleanupHandle { path, handle }
}

/// Remove a file or directory tree. `Ok(false)` if it was already gone.
pub fn remove_entry(path: &Path) -> Result<bool, CleanupFailed> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(source) => {
            return Err(CleanupFailed {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(CleanupFailed {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Counts from a single sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    /// Entries that disappeared between listing and deletion.
    pub vanished: usize,
    pub failed: usize,
}

/// Delete every entry directly under `root` last modified more than
/// `max_age` ago. A missing root is an empty pass.
pub fn sweep_once(root: &Path, max_age: Duration) -> SweepReport {
    let mut report = SweepReport::default();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return report,
        Err(e) => {
            warn!(root = ?root, error = %e, "Sweep could not list pool");
            return report;
        }
    };

    let now = SystemTime::now();
    for entry in entries.filter_map(Result::ok) {
        report.scanned += 1;
        let path = entry.path();

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                report.vanished += 1;
                continue;
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Sweep could not stat entry");
                report.failed += 1;
                continue;
            }
        };

        // Timestamps in the future count as brand new.
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= max_age {
            continue;
        }

        match remove_entry(&path) {
            Ok(true) => {
                debug!(path = ?path, age_secs = age.as_secs(), "Swept stale entry");
                report.removed += 1;
            }
            Ok(false) => report.vanished += 1,
            Err(e) => {
                warn!(error = %e, "Sweep failed to remove entry");
                report.failed += 1;
            }
        }
    }
    report
}

/// Background loop sweeping one pool for the life of the process.
#[derive(Debug, Clone)]
pub struct SweepWorker {
    pool: Pool,
    root: PathBuf,
    interval: Duration,
    max_age: Duration,
}

impl SweepWorker {
    pub fn new(pool: Pool, root: impl Into<PathBuf>, interval: Duration, max_age: Duration) -> Self {
        Self {
            pool,
            root: root.into(),
            interval,
            max_age,
        }
    }

    pub fn for_pool(settings: &Settings, pool: Pool) -> Self {
        Self::new(
            pool,
            settings.pool_root(pool),
            settings.sweep_interval,
            settings.max_artifact_age,
        )
    }

    /// Start the loop. The first pass runs immediately, which also clears
    /// leftovers from a previous process.
    pub fn spawn(self) -> JoinHandle<()> {
        info!(
            pool = %self.pool,
            root = ?self.root,
            interval_secs = self.interval.as_secs(),
            max_age_secs = self.max_age.as_secs(),
            "Starting sweep worker"
        );
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let root = self.root.clone();
                let max_age = self.max_age;
                match tokio::task::spawn_blocking(move || sweep_once(&root, max_age)).await {
                    Ok(report) if report.removed > 0 || report.failed > 0 => {
                        info!(pool = %self.pool, report = ?report, "Sweep pass finished");
                    }
                    Ok(report) => debug!(pool = %self.pool, report = ?report, "Sweep pass finished"),
                    Err(e) => warn!(pool = %self.pool, error = %e, "Sweep pass panicked"),
                }
            }
        })
    }
}

/// One sweep worker per pool.
pub fn spawn_sweepers(settings: &Settings) -> Vec<JoinHandle<()>> {
    Pool::ALL
        .iter()
        .map(|pool| SweepWorker::for_pool(settings, *pool).spawn())
        .collect()
}
