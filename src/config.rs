//! Runtime settings for pools, execution and retention.

use crate::error::ConfigError;
use crate::workspace::Pool;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CLEANUP_GRACE_SECS: u64 = 15;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_ARTIFACT_AGE_SECS: u64 = 300; // 5 minutes
pub const DEFAULT_IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "svg"];

/// Command-line and environment options. Flattened into the CLI in `main`.
#[derive(clap::Args, Debug, Clone)]
pub struct SettingsArgs {
    /// Pool root for initially generated diagrams
    #[arg(long, env = "GENERATED_POOL_DIR", default_value = "code_exe")]
    pub generated_root: PathBuf,

    /// Pool root for user-edited, re-executed diagrams
    #[arg(long, env = "EDITED_POOL_DIR", default_value = "updated_code_files")]
    pub edited_root: PathBuf,

    /// Wall-clock budget for one execution, in seconds
    #[arg(long, env = "EXEC_TIMEOUT_SECS", default_value_t = DEFAULT_EXEC_TIMEOUT_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_secs: u64,

    /// Delay before a job's workspace is deleted, in seconds
    #[arg(long, env = "CLEANUP_GRACE_SECS", default_value_t = DEFAULT_CLEANUP_GRACE_SECS)]
    pub grace_secs: u64,

    /// How often each pool is swept, in seconds
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = DEFAULT_SWEEP_INTERVAL_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval_secs: u64,

    /// Entries older than this are removed by the sweep, in seconds
    #[arg(long, env = "MAX_ARTIFACT_AGE_SECS", default_value_t = DEFAULT_MAX_ARTIFACT_AGE_SECS)]
    pub max_age_secs: u64,

    /// Recognized image extensions, comma separated
    #[arg(long, env = "IMAGE_EXTENSIONS", value_delimiter = ',',
          default_value = "png,jpg,jpeg,svg")]
    pub image_extensions: Vec<String>,

    /// Program used to run generated source files
    #[arg(long, env = "INTERPRETER", default_value = "python3")]
    pub interpreter: String,

    /// Extension given to persisted source files
    #[arg(long, env = "SOURCE_EXTENSION", default_value = "py")]
    pub source_extension: String,

    /// Public base URL prepended to image paths
    #[arg(long, env = "SERVER_URL", default_value = "http://localhost:8000")]
    pub server_url: String,

    /// Maximum bytes of stderr kept as failure diagnostics
    #[arg(long, env = "DIAGNOSTIC_TAIL_BYTES", default_value_t = 4096)]
    pub diagnostic_tail_bytes: usize,
}

/// Resolved settings shared by every component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub generated_root: PathBuf,
    pub edited_root: PathBuf,
    pub exec_timeout: Duration,
    pub cleanup_grace: Duration,
    pub sweep_interval: Duration,
    pub max_artifact_age: Duration,
    /// Lowercase, without the leading dot.
    pub image_extensions: Vec<String>,
    pub interpreter: String,
    pub source_extension: String,
    pub server_url: String,
    pub diagnostic_tail_bytes: usize,
}

impl Settings {
    pub fn pool_root(&self, pool: Pool) -> &Path {
        match pool {
            Pool::Generated => &self.generated_root,
            Pool::Edited => &self.edited_root,
        }
    }

    /// Reject a sweep age that could reclaim a workspace before its job
    /// has finished and its grace delay has run out.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = self.exec_timeout + self.cleanup_grace;
        if self.max_artifact_age < required {
            return Err(ConfigError::MaxAgeTooShort {
                max_age: self.max_artifact_age,
                required,
            });
        }
        Ok(())
    }

    /// Settings rooted under `base`, with both pools as subdirectories.
    pub fn with_base_dir(base: &Path) -> Self {
        Self {
            generated_root: base.join("code_exe"),
            edited_root: base.join("updated_code_files"),
            ..Self::default()
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            generated_root: PathBuf::from("code_exe"),
            edited_root: PathBuf::from("updated_code_files"),
            exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            cleanup_grace: Duration::from_secs(DEFAULT_CLEANUP_GRACE_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_artifact_age: Duration::from_secs(DEFAULT_MAX_ARTIFACT_AGE_SECS),
            image_extensions: DEFAULT_IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            interpreter: "python3".to_string(),
            source_extension: "py".to_string(),
            server_url: "http://localhost:8000".to_string(),
            diagnostic_tail_bytes: 4096,
        }
    }
}

impl From<SettingsArgs> for Settings {
    fn from(args: SettingsArgs) -> Self {
        Self {
            generated_root: args.generated_root,
            edited_root: args.edited_root,
            exec_timeout: Duration::from_secs(args.timeout_secs),
            cleanup_grace: Duration::from_secs(args.grace_secs),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            max_artifact_age: Duration::from_secs(args.max_age_secs),
            image_extensions: normalize_extensions(&args.image_extensions),
            interpreter: args.interpreter,
            source_extension: args.source_extension.trim_start_matches('.').to_string(),
            server_url: args.server_url.trim_end_matches('/').to_string(),
            diagnostic_tail_bytes: args.diagnostic_tail_bytes,
        }
    }
}

fn normalize_extensions(raw: &[String]) -> Vec<String> {
    let mut exts: Vec<String> = Vec::with_capacity(raw.len());
    for ext in raw {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        if !ext.is_empty() && !exts.contains(&ext) {
            exts.push(ext);
        }
    }
    exts
}
