//! Image artifacts left behind in a workspace.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// An image file produced by executed code.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub filename: String,
    pub workspace_path: PathBuf,
    pub size_bytes: u64,
    #[serde(skip)]
    pub created_at: Option<SystemTime>,
}

/// List recognized image files at the top level of `workspace`.
///
/// Read-only and non-recursive. `extensions` are lowercase without a dot;
/// matching is case-insensitive. Order is whatever the filesystem yields.
/// A missing or unreadable workspace gives an empty list.
pub fn collect(workspace: &Path, extensions: &[String]) -> Vec<Artifact> {
    let entries = match fs::read_dir(workspace) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = ?workspace, error = %e, "Workspace not readable, no artifacts");
            return Vec::new();
        }
    };

    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let filename = entry.file_name().into_string().ok()?;
            if !is_image(&filename, extensions) {
                return None;
            }
            Some(Artifact {
                filename,
                workspace_path: workspace.to_path_buf(),
                size_bytes: meta.len(),
                created_at: meta.created().or_else(|_| meta.modified()).ok(),
            })
        })
        .collect()
}

fn is_image(filename: &str, extensions: &[String]) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_IMAGE_EXTENSIONS;
    use tempfile::TempDir;

    fn image_exts() -> Vec<String> {
        DEFAULT_IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect()
    }

    fn names(artifacts: &[Artifact]) -> Vec<String> {
        let mut names: Vec<String> = artifacts.iter().map(|a| a.filename.clone()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_collect_filters_by_extension_case_insensitively() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.png"), b"png").unwrap();
        fs::write(tmp.path().join("b.txt"), b"txt").unwrap();
        fs::write(tmp.path().join("c.SVG"), b"<svg/>").unwrap();

        let artifacts = collect(tmp.path(), &image_exts());

        assert_eq!(names(&artifacts), vec!["a.png", "c.SVG"]);
        let a = artifacts.iter().find(|a| a.filename == "a.png").unwrap();
        assert_eq!(a.size_bytes, 3);
        assert_eq!(a.workspace_path, tmp.path());
    }

    #[test]
    fn test_collect_is_not_recursive() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("nested.png")).unwrap();
        fs::write(tmp.path().join("nested.png").join("deep.png"), b"x").unwrap();
        fs::write(tmp.path().join("top.jpeg"), b"x").unwrap();

        assert_eq!(names(&collect(tmp.path(), &image_exts())), vec!["top.jpeg"]);
    }

    #[test]
    fn test_collect_missing_workspace_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(collect(&tmp.path().join("gone"), &image_exts()).is_empty());
    }

    #[test]
    fn test_collect_does_not_mutate() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("diagram.png"), b"x").unwrap();
        fs::write(tmp.path().join("generated_diagram_1.py"), b"x").unwrap();

        collect(tmp.path(), &image_exts());
        collect(tmp.path(), &image_exts());

        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_files_without_extension_ignored() {
        assert!(!is_image("png", &image_exts()));
        assert!(!is_image(".png", &image_exts()));
        assert!(is_image("x.JpG", &image_exts()));
    }
}
