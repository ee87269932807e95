//! Git client interface: the narrow set of git operations the sync pipeline
//! needs, abstracted behind the `GitClient` trait so `sync.rs` never shells
//! out directly (and can be driven by a fake in tests). The concrete
//! implementation shells out to the `git` binary via `tokio::process::Command`.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

#[async_trait]
pub trait GitClient: Send + Sync {
    async fn clone_repo(&self, url: &str, dest_dir: &Path, git_ref: &str) -> Result<()>;
    async fn checkout(&self, dir: &Path, git_ref: &str) -> Result<()>;
    async fn create_branch(&self, dir: &Path, name: &str) -> Result<()>;
    async fn add(&self, dir: &Path, paths: &[PathBuf]) -> Result<()>;
    async fn commit(&self, dir: &Path, message: &str) -> Result<()>;
    async fn push(&self, dir: &Path, remote: &str, branch: &str, force: bool) -> Result<()>;
    async fn current_commit_sha(&self, dir: &Path) -> Result<String>;
    async fn diff(&self, dir: &Path, ref_a: &str, ref_b: &str) -> Result<String>;
    async fn changed_files(&self, dir: &Path) -> Result<Vec<String>>;
}

/// Shells out to the system `git` binary.
#[derive(Debug, Clone, Default)]
pub struct CliGitClient;

impl CliGitClient {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd.args(args);
        let output = cmd.output().await.map_err(SyncError::Io)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(classify_git_failure(args, &stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Maps a failing `git` invocation to the error taxonomy. Push rejections
/// due to branch protection are treated as an expected signal rather than a
/// failure; everything else affecting network operations is transient and
/// retried by the caller.
fn classify_git_failure(args: &[&str], stderr: &str) -> SyncError {
    let lower = stderr.to_lowercase();
    if args.first() == Some(&"push")
        && (lower.contains("protected branch") || lower.contains("required status check"))
    {
        return SyncError::BranchProtected(stderr.to_string());
    }
    if lower.contains("could not resolve host")
        || lower.contains("connection reset")
        || lower.contains("timed out")
        || lower.contains("early eof")
    {
        return SyncError::Transient(stderr.to_string());
    }
    if lower.contains("authentication failed") || lower.contains("permission denied") {
        return SyncError::Auth(stderr.to_string());
    }
    SyncError::Transient(stderr.to_string())
}

#[async_trait]
impl GitClient for CliGitClient {
    async fn clone_repo(&self, url: &str, dest_dir: &Path, git_ref: &str) -> Result<()> {
        self.run(
            None,
            &[
                "clone",
                "--quiet",
                "--branch",
                git_ref,
                "--single-branch",
                url,
                &dest_dir.to_string_lossy(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn checkout(&self, dir: &Path, git_ref: &str) -> Result<()> {
        self.run(Some(dir), &["checkout", git_ref]).await?;
        Ok(())
    }

    async fn create_branch(&self, dir: &Path, name: &str) -> Result<()> {
        self.run(Some(dir), &["checkout", "-b", name]).await?;
        Ok(())
    }

    async fn add(&self, dir: &Path, paths: &[PathBuf]) -> Result<()> {
        let mut args = vec!["add", "--"];
        let path_strs: Vec<String> = paths.iter().map(|p| p.to_string_lossy().to_string()).collect();
        args.extend(path_strs.iter().map(|s| s.as_str()));
        self.run(Some(dir), &args).await?;
        Ok(())
    }

    async fn commit(&self, dir: &Path, message: &str) -> Result<()> {
        self.run(Some(dir), &["commit", "--quiet", "-m", message]).await?;
        Ok(())
    }

    async fn push(&self, dir: &Path, remote: &str, branch: &str, force: bool) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        let mut args = vec!["push", "--quiet"];
        if force {
            args.push("--force-with-lease");
        }
        args.push(remote);
        args.push(&refspec);
        self.run(Some(dir), &args).await?;
        Ok(())
    }

    async fn current_commit_sha(&self, dir: &Path) -> Result<String> {
        self.run(Some(dir), &["rev-parse", "HEAD"]).await
    }

    async fn diff(&self, dir: &Path, ref_a: &str, ref_b: &str) -> Result<String> {
        self.run(Some(dir), &["diff", ref_a, ref_b]).await
    }

    async fn changed_files(&self, dir: &Path) -> Result<Vec<String>> {
        let out = self.run(Some(dir), &["status", "--porcelain"]).await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l[3.min(l.len())..].trim().to_string())
            .collect())
    }
}
