//! Diff-scoped scanning: resolve the set of files changed since a base ref
//! so a scan can be limited to what a pull request actually touched.

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitScopeError {
    #[error("git is not installed or not available in PATH")]
    GitMissing,
    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to resolve changed files from diff base '{diff_base}'. {detail}")]
    DiffFailed { diff_base: String, detail: String },
}

/// Root-relative paths of files added/changed/renamed since
/// `<diff_base>...HEAD`.
pub fn changed_files(root: &Path, diff_base: &str) -> Result<HashSet<String>, GitScopeError> {
    let output = Command::new("git")
        .args([
            "diff",
            "--name-only",
            "--diff-filter=ACMR",
            &format!("{diff_base}...HEAD"),
        ])
        .current_dir(root)
        .output()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                GitScopeError::GitMissing
            } else {
                GitScopeError::Spawn(err)
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(GitScopeError::DiffFailed {
            diff_base: diff_base.to_string(),
            detail: if stderr.is_empty() {
                "Check git history and ref availability.".to_string()
            } else {
                stderr
            },
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
