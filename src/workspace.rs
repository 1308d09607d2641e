//! Workspace pools and per-job directory allocation.

use crate::error::WorkspaceError;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const WORKSPACE_PREFIX: &str = "job-";
const MAX_ALLOCATE_ATTEMPTS: usize = 3;

/// Top-level partition of workspaces. Pools never share directories, so a
/// sweep over one can't touch artifacts served from the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    /// Diagrams produced from freshly generated code.
    Generated,
    /// Diagrams produced from user-edited code.
    Edited,
}

impl Pool {
    pub const ALL: [Pool; 2] = [Pool::Generated, Pool::Edited];

    /// URL prefix under which this pool's files are served.
    pub fn url_prefix(self) -> &'static str {
        match self {
            Pool::Generated => "/images",
            Pool::Edited => "/updated_images",
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pool::Generated => write!(f, "generated"),
            Pool::Edited => write!(f, "edited"),
        }
    }
}

/// A directory exclusively owned by one job.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub job_id: String,
    pub pool: Pool,
    pub path: PathBuf,
}

impl Workspace {
    /// Directory name relative to the pool root.
    pub fn name(&self) -> String {
        format!("{}{}", WORKSPACE_PREFIX, self.job_id)
    }
}

/// Create a fresh, uniquely named workspace under `root`.
///
/// The pool root is created on first use; concurrent first use is fine since
/// `create_dir_all` tolerates a racing creator. The workspace itself is made
/// with `create_dir` so an existing directory is never handed out twice.
pub fn allocate(root: &Path, pool: Pool) -> Result<Workspace, WorkspaceError> {
    fs::create_dir_all(root).map_err(|source| WorkspaceError::StorageUnavailable {
        path: root.to_path_buf(),
        source,
    })?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        let job_id = new_token();
        let path = root.join(format!("{}{}", WORKSPACE_PREFIX, job_id));

        match fs::create_dir(&path) {
            Ok(()) => {
                info!(%pool, job_id = %job_id, path = ?path, "Allocated workspace");
                return Ok(Workspace { job_id, pool, path });
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < MAX_ALLOCATE_ATTEMPTS => {
                debug!(path = ?path, "Workspace name collision, retrying");
            }
            Err(source) => {
                return Err(WorkspaceError::StorageUnavailable { path, source });
            }
        }
    }
}

/// Unpredictable 32-char hex token.
pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_allocate_creates_missing_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("nested").join("code_exe");

        let ws = allocate(&root, Pool::Generated).unwrap();

        assert!(root.is_dir());
        assert!(ws.path.is_dir());
        assert_eq!(ws.path.parent().unwrap(), root);
        assert_eq!(ws.path.file_name().unwrap().to_str().unwrap(), ws.name());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocations_are_distinct() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("pool");

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let root = root.clone();
                tokio::task::spawn_blocking(move || allocate(&root, Pool::Edited))
            })
            .collect();

        let mut paths = HashSet::new();
        for handle in handles {
            let ws = handle.await.unwrap().unwrap();
            assert!(paths.insert(ws.path));
        }
        assert_eq!(paths.len(), 32);
    }

    #[test]
    fn test_root_that_is_a_file_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("not-a-dir");
        fs::write(&root, b"occupied").unwrap();

        let err = allocate(&root, Pool::Generated).unwrap_err();
        assert!(matches!(err, WorkspaceError::StorageUnavailable { .. }));
    }

    #[test]
    fn test_pool_prefixes_differ() {
        assert_ne!(Pool::Generated.url_prefix(), Pool::Edited.url_prefix());
    }
}
