//! Entry points tying allocation, execution, collection and cleanup together.

use crate::artifact::{self, Artifact};
use crate::config::Settings;
use crate::error::LifecycleError;
use crate::executor::{Diagnostics, ExecutionJob, Executor, JobStatus};
use crate::retention::{schedule_cleanup, CleanupHandle};
use crate::workspace::{self, Pool};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of running one piece of generated code.
///
/// `artifacts` exist on disk when this is returned and stay there for at
/// least the configured grace delay.
#[derive(Debug, Serialize)]
pub struct ExecutionOutcome {
    pub job_id: String,
    pub pool: Pool,
    /// Workspace directory name relative to the pool root.
    pub workspace: String,
    pub status: JobStatus,
    /// Image filenames, sorted.
    pub artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
    #[serde(skip)]
    pub workspace_path: PathBuf,
    #[serde(skip)]
    pub cleanup: CleanupHandle,
}

impl ExecutionOutcome {
    /// Paths under the pool's URL prefix, e.g. `/images/job-<id>/diagram.png`.
    pub fn artifact_paths(&self) -> Vec<String> {
        self.artifacts
            .iter()
            .map(|name| format!("{}/{}/{}", self.pool.url_prefix(), self.workspace, name))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleManager {
    settings: Arc<Settings>,
    executor: Executor,
}

impl LifecycleManager {
    pub fn new(settings: Arc<Settings>) -> Self {
        let executor = Executor::from_settings(&settings);
        Self { settings, executor }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run freshly generated code in the `Generated` pool.
    pub async fn run_generated_code(&self, source_code: &str) -> Result<ExecutionOutcome, LifecycleError> {
        self.run_in_pool(Pool::Generated, source_code).await
    }

    /// Run user-edited code in the `Edited` pool.
    pub async fn rerun_edited_code(&self, source_code: &str) -> Result<ExecutionOutcome, LifecycleError> {
        self.run_in_pool(Pool::Edited, source_code).await
    }

    async fn run_in_pool(&self, pool: Pool, source_code: &str) -> Result<ExecutionOutcome, LifecycleError> {
        let root = self.settings.pool_root(pool).to_path_buf();
        let ws = tokio::task::spawn_blocking(move || workspace::allocate(&root, pool)).await??;

        let mut job = ExecutionJob::new(&ws, source_code, self.settings.exec_timeout);
        let result = match self.executor.execute(&mut job).await {
            Ok(result) => result,
            Err(e) => {
                warn!(job_id = %ws.job_id, %pool, error = %e, "Job could not run");
                // The workspace is useless now; let it go right away.
                schedule_cleanup(ws.path.clone(), std::time::Duration::ZERO);
                return Err(e.into());
            }
        };

        let extensions = self.settings.image_extensions.clone();
        let ws_path = ws.path.clone();
        let mut artifacts: Vec<Artifact> =
            tokio::task::spawn_blocking(move || artifact::collect(&ws_path, &extensions)).await?;
        artifacts.sort_by(|a, b| a.filename.cmp(&b.filename));
        let artifacts: Vec<String> = artifacts.into_iter().map(|a| a.filename).collect();

        info!(
            job_id = %ws.job_id,
            %pool,
            status = ?result.status,
            artifacts = artifacts.len(),
            "Execution complete"
        );

        let cleanup = schedule_cleanup(ws.path.clone(), self.settings.cleanup_grace);
        Ok(ExecutionOutcome {
            workspace: ws.name(),
            job_id: ws.job_id,
            pool,
            status: result.status,
            artifacts,
            diagnostics: result.diagnostics,
            workspace_path: ws.path,
            cleanup,
        })
    }
}
