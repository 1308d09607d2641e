//! Error types for workspace, execution and provider handling.
//!
//! Non-zero exits and timeouts are not errors here; they are terminal job
//! statuses (see [`crate::executor::JobStatus`]). Cleanup failures never
//! leave the retention module.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures while preparing a workspace.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    /// The pool root could not be created or is not writable.
    #[error("Storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures that prevent a job from producing a terminal status.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Empty source code or a zero timeout budget.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// The source file could not be written into the workspace.
    #[error("Workspace unwritable at {path}: {source}")]
    WorkspaceUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The interpreter could not be spawned.
    #[error("Failed to launch `{program}`: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the subprocess failed.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors surfaced by the lifecycle entry points.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// A blocking task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A deletion that did not go through. Logged by the retention module and
/// never returned to a request.
#[derive(Error, Debug)]
#[error("Cleanup failed for {path}: {source}")]
pub struct CleanupFailed {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Settings that would break the retention guarantees.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The sweep could remove a workspace whose job is still running or
    /// whose URLs are still within the grace delay.
    #[error("Max artifact age {max_age:?} is shorter than timeout plus grace delay ({required:?})")]
    MaxAgeTooShort { max_age: Duration, required: Duration },
}

/// Unknown cloud provider key.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Unrecognized cloud provider `{0}` (expected aws, gcp or azure)")]
    Unrecognized(String),
}
