//! Runs generated source code as a subprocess inside its workspace.

use crate::config::Settings;
use crate::error::ExecutionError;
use crate::workspace::{new_token, Workspace};
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound on captured bytes per stream; the rest is drained and dropped.
const MAX_CAPTURE_BYTES: u64 = 1024 * 1024;
/// How long to wait for pipes to close once the child is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut)
    }
}

/// Structured failure information. Only a bounded tail of stderr is kept.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stderr_tail: String,
    pub truncated: bool,
}

/// One request to run generated code in a workspace.
#[derive(Debug)]
pub struct ExecutionJob {
    pub id: String,
    pub workspace_path: PathBuf,
    pub timeout_budget: Duration,
    source_code: String,
    status: JobStatus,
}

impl ExecutionJob {
    pub fn new(workspace: &Workspace, source_code: impl Into<String>, timeout_budget: Duration) -> Self {
        Self {
            id: workspace.job_id.clone(),
            workspace_path: workspace.path.clone(),
            timeout_budget,
            source_code: source_code.into(),
            status: JobStatus::Pending,
        }
    }

    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }
}

/// Outcome of a job that reached a terminal status.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: JobStatus,
    /// Present for `Failed` and `TimedOut`.
    pub diagnostics: Option<Diagnostics>,
    pub source_file: PathBuf,
    pub elapsed: Duration,
}

/// Subprocess runner. One subprocess per job, never retried.
#[derive(Debug, Clone)]
pub struct Executor {
    interpreter: String,
    source_extension: String,
    diagnostic_tail_bytes: usize,
}

impl Executor {
    pub fn new(interpreter: impl Into<String>, source_extension: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            source_extension: source_extension.into(),
            diagnostic_tail_bytes: 4096,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.interpreter.clone(), settings.source_extension.clone())
            .with_diagnostic_tail(settings.diagnostic_tail_bytes)
    }

    pub fn with_diagnostic_tail(mut self, bytes: usize) -> Self {
        self.diagnostic_tail_bytes = bytes;
        self
    }

    /// Persist the job's source, run it with the workspace as cwd and wait
    /// at most `timeout_budget`.
    ///
    /// Non-zero exits and timeouts come back as `Ok` with the matching
    /// status; `Err` means the job could not be run at all.
    pub async fn execute(&self, job: &mut ExecutionJob) -> Result<ExecutionResult, ExecutionError> {
        if job.source_code.trim().is_empty() {
            return Err(ExecutionError::InvalidJob("source code is empty".to_string()));
        }
        if job.timeout_budget.is_zero() {
            return Err(ExecutionError::InvalidJob("timeout budget must be positive".to_string()));
        }

        let source_file = self.persist_source(job).await?;
        let file_name = source_file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&file_name)
            .current_dir(&job.workspace_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout also takes down anything it forked.
        #[cfg(unix)]
        cmd.process_group(0);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ExecutionError::LaunchFailed {
            program: self.interpreter.clone(),
            source,
        })?;
        // Leader pid doubles as the group id; tokio forgets it once reaped.
        let pgid = child.id();
        job.status = JobStatus::Running;
        info!(job_id = %job.id, pid = ?pgid, budget = ?job.timeout_budget, "Job running");

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let wait = tokio::time::timeout(job.timeout_budget, child.wait()).await;
        let (status, exit_code, signal) = match wait {
            Ok(Ok(exit)) => {
                let status = if exit.success() {
                    JobStatus::Completed
                } else {
                    JobStatus::Failed
                };
                // Anything it left running in the background goes with it.
                kill_group(pgid);
                (status, exit.code(), exit_signal(&exit))
            }
            Ok(Err(e)) => {
                terminate(&mut child, pgid).await;
                return Err(ExecutionError::IoError(e));
            }
            Err(_) => {
                warn!(job_id = %job.id, budget = ?job.timeout_budget, "Job exceeded its budget, killing");
                terminate(&mut child, pgid).await;
                (JobStatus::TimedOut, None, None)
            }
        };
        let elapsed = start.elapsed();

        let (stdout, stderr) = tokio::join!(drain(stdout), drain(stderr));
        info!(
            job_id = %job.id,
            status = ?status,
            exit_code = ?exit_code,
            elapsed_ms = elapsed.as_millis() as u64,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Job finished"
        );
        debug!(job_id = %job.id, stdout = %String::from_utf8_lossy(&stdout), "Job stdout");

        job.status = status;
        let diagnostics = (status != JobStatus::Completed).then(|| {
            let (stderr_tail, truncated) = tail(&stderr, self.diagnostic_tail_bytes);
            Diagnostics {
                exit_code,
                signal,
                stderr_tail,
                truncated,
            }
        });

        Ok(ExecutionResult {
            status,
            diagnostics,
            source_file,
            elapsed,
        })
    }

    /// Write the source under a name no other job in this workspace can take.
    async fn persist_source(&self, job: &ExecutionJob) -> Result<PathBuf, ExecutionError> {
        let path = job
            .workspace_path
            .join(format!("generated_diagram_{}.{}", new_token(), self.source_extension));

        let unwritable = |source| ExecutionError::WorkspaceUnwritable {
            path: path.clone(),
            source,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(unwritable)?;
        file.write_all(job.source_code.as_bytes()).await.map_err(unwritable)?;
        file.flush().await.map_err(unwritable)?;

        debug!(job_id = %job.id, path = ?path, bytes = job.source_code.len(), "Source persisted");
        Ok(path)
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = (&mut pipe).take(MAX_CAPTURE_BYTES).read_to_end(&mut buf).await;
            let _ = tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await;
        }
        buf
    })
}

async fn drain(reader: JoinHandle<Vec<u8>>) -> Vec<u8> {
    let abort = reader.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_GRACE, reader).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            abort.abort();
            Vec::new()
        }
    }
}

/// SIGKILL the job's process group. ESRCH just means nothing was left.
fn kill_group(pgid: Option<u32>) {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Some(pgid) = pgid {
            match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => debug!(pgid, error = %e, "killpg failed"),
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

async fn terminate(child: &mut Child, pgid: Option<u32>) {
    kill_group(pgid);
    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill after timeout failed");
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Last `max` bytes of `bytes` as lossy UTF-8, and whether anything was cut.
fn tail(bytes: &[u8], max: usize) -> (String, bool) {
    if bytes.len() <= max {
        return (String::from_utf8_lossy(bytes).into_owned(), false);
    }
    // Never start mid-character: skip UTF-8 continuation bytes.
    let mut start = bytes.len() - max;
    while start < bytes.len() && bytes[start] & 0xC0 == 0x80 {
        start += 1;
    }
    (String::from_utf8_lossy(&bytes[start..]).into_owned(), true)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::workspace::{allocate, Pool};
    use tempfile::TempDir;

    fn sh() -> Executor {
        Executor::new("sh", "sh")
    }

    fn job(tmp: &TempDir, code: &str, budget: Duration) -> ExecutionJob {
        let ws = allocate(tmp.path(), Pool::Generated).unwrap();
        ExecutionJob::new(&ws, code, budget)
    }

    #[tokio::test]
    async fn test_completed_job_writes_into_workspace() {
        let tmp = TempDir::new().unwrap();
        let mut job = job(&tmp, "echo hi > out.png\necho done", Duration::from_secs(5));
        assert_eq!(job.status(), JobStatus::Pending);

        let result = sh().execute(&mut job).await.unwrap();

        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(result.diagnostics.is_none());
        assert!(job.workspace_path.join("out.png").is_file());
        assert_eq!(result.source_file.parent().unwrap(), job.workspace_path);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed_status() {
        let tmp = TempDir::new().unwrap();
        let mut job = job(&tmp, "echo 'no module named diagrams' >&2\nexit 3", Duration::from_secs(5));

        let result = sh().execute(&mut job).await.unwrap();

        assert_eq!(result.status, JobStatus::Failed);
        let diag = result.diagnostics.unwrap();
        assert_eq!(diag.exit_code, Some(3));
        assert!(diag.stderr_tail.contains("no module named diagrams"));
        assert!(!diag.truncated);
    }

    /// Live and not a zombie, per `/proc/<pid>/stat`.
    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// SIGKILL delivery is asynchronous; give it a moment to land.
    #[cfg(target_os = "linux")]
    async fn gone_soon(pid: u32) -> bool {
        for _ in 0..50 {
            if !is_running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[cfg(target_os = "linux")]
    fn read_pid(job: &ExecutionJob, name: &str) -> u32 {
        std::fs::read_to_string(job.workspace_path.join(name))
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_subprocess() {
        let tmp = TempDir::new().unwrap();
        let mut job = job(
            &tmp,
            "echo $$ > main.pid\nsleep 30 &\necho $! > child.pid\nwait",
            Duration::from_millis(300),
        );

        let start = Instant::now();
        let result = sh().execute(&mut job).await.unwrap();

        assert_eq!(result.status, JobStatus::TimedOut);
        assert!(job.status().is_terminal());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(result.diagnostics.is_some());
        assert!(gone_soon(read_pid(&job, "main.pid")).await);
        assert!(gone_soon(read_pid(&job, "child.pid")).await);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_background_work_dies_with_a_clean_exit() {
        let tmp = TempDir::new().unwrap();
        let mut job = job(
            &tmp,
            "(sleep 1; touch late.png) &\necho $! > child.pid\ntouch diagram.png\nexit 0",
            Duration::from_secs(5),
        );

        let start = Instant::now();
        let result = sh().execute(&mut job).await.unwrap();

        assert_eq!(result.status, JobStatus::Completed);
        // Returning must not wait on the straggler's pipes.
        assert!(start.elapsed() < Duration::from_millis(900));
        assert!(gone_soon(read_pid(&job, "child.pid")).await);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(job.workspace_path.join("diagram.png").is_file());
        assert!(!job.workspace_path.join("late.png").exists());
    }

    #[tokio::test]
    async fn test_empty_source_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut job = job(&tmp, "   \n", Duration::from_secs(1));

        let err = sh().execute(&mut job).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidJob(_)));
        assert_eq!(job.status(), JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_zero_budget_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut job = job(&tmp, "true", Duration::ZERO);

        let err = sh().execute(&mut job).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidJob(_)));
    }

    #[tokio::test]
    async fn test_missing_workspace_is_unwritable() {
        let tmp = TempDir::new().unwrap();
        let mut job = job(&tmp, "true", Duration::from_secs(1));
        std::fs::remove_dir_all(&job.workspace_path).unwrap();

        let err = sh().execute(&mut job).await.unwrap_err();
        assert!(matches!(err, ExecutionError::WorkspaceUnwritable { .. }));
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_to_launch() {
        let tmp = TempDir::new().unwrap();
        let mut job = job(&tmp, "print('x')", Duration::from_secs(1));

        let err = Executor::new("definitely-not-an-interpreter-4f1c", "py")
            .execute(&mut job)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::LaunchFailed { .. }));
    }

    #[tokio::test]
    async fn test_repeated_runs_get_distinct_source_files() {
        let tmp = TempDir::new().unwrap();
        let ws = allocate(tmp.path(), Pool::Edited).unwrap();
        let executor = sh();

        let mut first = ExecutionJob::new(&ws, "true", Duration::from_secs(5));
        let mut second = ExecutionJob::new(&ws, "true", Duration::from_secs(5));
        let a = executor.execute(&mut first).await.unwrap();
        let b = executor.execute(&mut second).await.unwrap();

        assert_ne!(a.source_file, b.source_file);
        assert!(a.source_file.is_file());
        assert!(b.source_file.is_file());
    }

    #[tokio::test]
    async fn test_diagnostics_keep_only_the_tail() {
        let tmp = TempDir::new().unwrap();
        let mut job = job(
            &tmp,
            "i=0\nwhile [ $i -lt 200 ]; do echo \"line $i\" >&2; i=$((i+1)); done\nexit 1",
            Duration::from_secs(5),
        );

        let result = sh().with_diagnostic_tail(64).execute(&mut job).await.unwrap();

        let diag = result.diagnostics.unwrap();
        assert!(diag.truncated);
        assert!(diag.stderr_tail.len() <= 64);
        assert!(diag.stderr_tail.contains("line 199"));
    }

    #[test]
    fn test_tail_short_input_untouched() {
        assert_eq!(tail(b"abc", 10), ("abc".to_string(), false));
        assert_eq!(tail(b"abcdef", 2), ("ef".to_string(), true));
    }

    #[test]
    fn test_tail_never_splits_a_character() {
        let stderr = "Traceback: ééé".as_bytes();
        for max in 1..8 {
            let (kept, truncated) = tail(stderr, max);
            assert!(truncated);
            assert!(kept.len() <= max, "max {} gave {:?}", max, kept);
            assert!(!kept.contains('\u{FFFD}'));
        }
        assert_eq!(tail(stderr, 3).0, "é");
    }
}
