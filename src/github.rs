//! Host API interface: the GitHub-shaped surface the core needs —
//! branches, file/tree reads, PRs — abstracted behind the `HostApi` trait so
//! the orchestrator and sync pipeline never touch `octocrab` directly.
//! `GitHubClient` is the one concrete implementation, detecting auth via the
//! `gh` CLI first, then falling back to `GITHUB_TOKEN`.

use crate::error::{Result, SyncError};
use crate::model::RepoRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use serde::Deserialize;
use std::env;
use std::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrState {
    Open,
    Closed,
    All,
}

impl PrState {
    fn as_octocrab_state(self) -> octocrab::params::State {
        match self {
            PrState::Open => octocrab::params::State::Open,
            PrState::Closed => octocrab::params::State::Closed,
            PrState::All => octocrab::params::State::All,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub name: String,
    pub protected: bool,
    pub tip_sha: String,
}

#[derive(Debug, Clone)]
pub struct FileContent {
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub path: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

#[derive(Debug, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
    pub head_branch: String,
    pub base_branch: String,
    pub title: String,
    pub open: bool,
}

#[derive(Debug, Clone)]
pub struct CreatePrRequest {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct User {
    pub login: String,
    pub id: u64,
}

/// The narrow, provider-agnostic surface the orchestrator and sync pipeline
/// depend on. Named per-call rather than a single god-object client, per
/// the design notes' guidance to express mock-heavy interface tests as
/// explicit capability traits.
#[async_trait]
pub trait HostApi: Send + Sync {
    async fn list_branches(&self, repo: &RepoRef) -> Result<Vec<Branch>>;
    async fn get_branch(&self, repo: &RepoRef, name: &str) -> Result<Branch>;
    async fn get_file(&self, repo: &RepoRef, path: &str, git_ref: &str) -> Result<Option<FileContent>>;
    async fn get_tree(&self, repo: &RepoRef, git_ref: &str, recursive: bool) -> Result<Tree>;
    async fn list_prs(&self, repo: &RepoRef, state: PrState) -> Result<Vec<PullRequest>>;
    async fn create_pr(&self, repo: &RepoRef, req: CreatePrRequest) -> Result<PullRequest>;
    async fn delete_branch(&self, repo: &RepoRef, name: &str) -> Result<()>;
    async fn current_user(&self) -> Result<User>;
    async fn list_tags(&self, repo: &RepoRef) -> Result<Vec<String>>;
}

/// GitHub authentication strategies, detected in order: explicit config
/// choice, then `gh` CLI, then `GITHUB_TOKEN`.
#[derive(Debug, Clone)]
pub enum AuthStrategy {
    GitHubCli,
    EnvironmentToken,
}

pub struct GitHubClient {
    client: Octocrab,
    http: reqwest::Client,
    username: String,
}

impl GitHubClient {
    pub async fn new(auth_method: &str) -> Result<Self> {
        let (strategy, token) = Self::detect_authentication(auth_method)?;
        info!(?strategy, "using GitHub authentication strategy");

        let client = Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(|e| SyncError::Auth(format!("failed to build GitHub client: {e}")))?;

        let user = client
            .current()
            .user()
            .await
            .map_err(|e| SyncError::Auth(format!("failed to fetch authenticated user: {e}")))?;

        info!(username = %user.login, "authenticated with GitHub");

        Ok(Self {
            client,
            http: reqwest::Client::new(),
            username: user.login,
        })
    }

    fn detect_authentication(auth_method: &str) -> Result<(AuthStrategy, String)> {
        match auth_method {
            "auto" => {
                if let Ok(token) = Self::try_github_cli() {
                    Ok((AuthStrategy::GitHubCli, token))
                } else if let Ok(token) = Self::try_environment_token() {
                    Ok((AuthStrategy::EnvironmentToken, token))
                } else {
                    Err(SyncError::Auth(
                        "no GitHub authentication found: install+auth `gh`, or set GITHUB_TOKEN"
                            .into(),
                    ))
                }
            }
            "gh_cli" => Self::try_github_cli().map(|t| (AuthStrategy::GitHubCli, t)),
            "token" => Self::try_environment_token().map(|t| (AuthStrategy::EnvironmentToken, t)),
            other => Err(SyncError::Validation(format!("unknown auth method: {other}"))),
        }
    }

    fn try_github_cli() -> Result<String> {
        debug!("attempting gh CLI authentication");
        if !Self::is_command_available("gh") {
            return Err(SyncError::Auth("gh CLI is not installed".into()));
        }

        let status = Command::new("gh")
            .args(["auth", "status"])
            .output()
            .map_err(|e| SyncError::Io(e))?;
        if !status.status.success() {
            return Err(SyncError::Auth("gh CLI is not authenticated".into()));
        }

        let output = Command::new("gh")
            .args(["auth", "token"])
            .output()
            .map_err(|e| SyncError::Io(e))?;
        if !output.status.success() {
            return Err(SyncError::Auth("gh CLI failed to return a token".into()));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(SyncError::Auth("gh CLI returned an empty token".into()));
        }
        Ok(token)
    }

    fn try_environment_token() -> Result<String> {
        let token = env::var("GITHUB_TOKEN")
            .map_err(|_| SyncError::Auth("GITHUB_TOKEN is not set".into()))?;
        if token.is_empty() {
            return Err(SyncError::Auth("GITHUB_TOKEN is empty".into()));
        }
        if !token.starts_with("ghp_") && !token.starts_with("gho_") && !token.starts_with("ghs_") {
            warn!("GITHUB_TOKEN doesn't look like a GitHub token (expected ghp_/gho_/ghs_ prefix)");
        }
        Ok(token)
    }

    fn is_command_available(command: &str) -> bool {
        Command::new("which")
            .arg(command)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Classifies an `octocrab` error into the taxonomy, pulling rate-limit
    /// reset metadata from a side-channel `/rate_limit` call when the
    /// status suggests exhaustion (octocrab's typed responses don't expose
    /// response headers directly).
    async fn classify_error(&self, err: octocrab::Error) -> SyncError {
        match &err {
            octocrab::Error::GitHub { source, .. } => {
                let status = source.status_code.as_u16();
                if status == 429 {
                    let reset_at = self.fetch_rate_limit_reset().await;
                    return SyncError::RateLimited {
                        message: source.message.clone(),
                        reset_at,
                    };
                }
                if status == 403 && source.message.to_lowercase().contains("rate limit") {
                    let reset_at = self.fetch_rate_limit_reset().await;
                    return SyncError::RateLimited {
                        message: source.message.clone(),
                        reset_at,
                    };
                }
                if status == 403 && looks_like_branch_protection(&source.message) {
                    return SyncError::BranchProtected(source.message.clone());
                }
                if status == 401 || status == 403 {
                    return SyncError::Auth(source.message.clone());
                }
                if (500..600).contains(&status) {
                    return SyncError::Transient(source.message.clone());
                }
                SyncError::Validation(source.message.clone())
            }
            octocrab::Error::Http { .. } | octocrab::Error::Hyper { .. } => {
                SyncError::Transient(err.to_string())
            }
            other => SyncError::Transient(other.to_string()),
        }
    }

    async fn fetch_rate_limit_reset(&self) -> Option<DateTime<Utc>> {
        #[derive(Deserialize)]
        struct RateLimitResponse {
            resources: Resources,
        }
        #[derive(Deserialize)]
        struct Resources {
            core: Core,
        }
        #[derive(Deserialize)]
        struct Core {
            reset: i64,
        }

        let resp = self
            .http
            .get("https://api.github.com/rate_limit")
            .send()
            .await
            .ok()?;
        let parsed: RateLimitResponse = resp.json().await.ok()?;
        DateTime::<Utc>::from_timestamp(parsed.resources.core.reset, 0)
    }
}

fn looks_like_branch_protection(message: &str) -> bool {
    let m = message.to_lowercase();
    m.contains("protected branch") || m.contains("required status check")
}

#[async_trait]
impl HostApi for GitHubClient {
    async fn list_branches(&self, repo: &RepoRef) -> Result<Vec<Branch>> {
        let mut branches = Vec::new();
        let mut page: u32 = 1;
        loop {
            let result = self
                .client
                .repos(&repo.owner, &repo.name)
                .list_branches()
                .per_page(100)
                .page(page as u8)
                .send()
                .await;
            let page_result = match result {
                Ok(p) => p,
                Err(e) => return Err(self.classify_error(e).await),
            };
            if page_result.items.is_empty() {
                break;
            }
            for b in page_result.items {
                branches.push(Branch {
                    name: b.name,
                    protected: b.protected,
                    tip_sha: b.commit.sha,
                });
            }
            page += 1;
            if page > 255 {
                break;
            }
        }
        Ok(branches)
    }

    async fn get_branch(&self, repo: &RepoRef, name: &str) -> Result<Branch> {
        let result = self
            .client
            .repos(&repo.owner, &repo.name)
            .get_branch(name)
            .await;
        match result {
            Ok(b) => Ok(Branch {
                name: b.name,
                protected: b.protected,
                tip_sha: b.commit.sha,
            }),
            Err(e) => Err(self.classify_error(e).await),
        }
    }

    async fn get_file(&self, repo: &RepoRef, path: &str, git_ref: &str) -> Result<Option<FileContent>> {
        let result = self
            .client
            .repos(&repo.owner, &repo.name)
            .get_content()
            .path(path)
            .r#ref(git_ref)
            .send()
            .await;

        let mut content = match result {
            Ok(c) => c,
            Err(octocrab::Error::GitHub { source, .. }) if source.status_code.as_u16() == 404 => {
                return Ok(None)
            }
            Err(e) => return Err(self.classify_error(e).await),
        };

        let Some(item) = content.items.pop() else {
            return Ok(None);
        };
        let decoded = item
            .decoded_content()
            .ok_or_else(|| SyncError::Transient(format!("{path}: no content payload (is it a directory?)")))?;
        Ok(Some(FileContent {
            bytes: decoded.into_bytes(),
        }))
    }

    async fn get_tree(&self, repo: &RepoRef, git_ref: &str, recursive: bool) -> Result<Tree> {
        #[derive(Deserialize)]
        struct TreeResponse {
            tree: Vec<TreeItem>,
        }
        #[derive(Deserialize)]
        struct TreeItem {
            path: String,
            #[serde(rename = "type")]
            kind: String,
        }

        let route = format!(
            "/repos/{}/{}/git/trees/{git_ref}{}",
            repo.owner,
            repo.name,
            if recursive { "?recursive=1" } else { "" }
        );
        let response: TreeResponse = self
            .client
            .get(route, None::<&()>)
            .await
            .map_err(|e| self.classify_error_sync(e))?;

        Ok(Tree {
            entries: response
                .tree
                .into_iter()
                .map(|t| TreeEntry {
                    is_dir: t.kind == "tree",
                    path: t.path,
                })
                .collect(),
        })
    }

    async fn list_prs(&self, repo: &RepoRef, state: PrState) -> Result<Vec<PullRequest>> {
        let result = self
            .client
            .pulls(&repo.owner, &repo.name)
            .list()
            .state(state.as_octocrab_state())
            .per_page(100)
            .send()
            .await;
        let page = match result {
            Ok(p) => p,
            Err(e) => return Err(self.classify_error(e).await),
        };
        Ok(page
            .items
            .into_iter()
            .map(|pr| PullRequest {
                number: pr.number,
                html_url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
                head_branch: pr.head.ref_field,
                base_branch: pr.base.ref_field,
                title: pr.title.unwrap_or_default(),
                open: matches!(pr.state, Some(octocrab::models::IssueState::Open)),
            })
            .collect())
    }

    async fn create_pr(&self, repo: &RepoRef, req: CreatePrRequest) -> Result<PullRequest> {
        let created = self
            .client
            .pulls(&repo.owner, &repo.name)
            .create(&req.title, &req.head, &req.base)
            .body(&req.body)
            .send()
            .await;
        let pr = match created {
            Ok(pr) => pr,
            Err(e) => return Err(self.classify_error(e).await),
        };

        if !req.labels.is_empty() {
            if let Err(e) = self
                .client
                .issues(&repo.owner, &repo.name)
                .add_labels(pr.number, &req.labels)
                .await
            {
                warn!(error = %e, "failed to apply labels to newly created PR");
            }
        }

        Ok(PullRequest {
            number: pr.number,
            html_url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
            head_branch: pr.head.ref_field,
            base_branch: pr.base.ref_field,
            title: pr.title.unwrap_or_default(),
            open: matches!(pr.state, Some(octocrab::models::IssueState::Open)),
        })
    }

    async fn delete_branch(&self, repo: &RepoRef, name: &str) -> Result<()> {
        let route = format!("/repos/{}/{}/git/refs/heads/{name}", repo.owner, repo.name);
        self.client
            .delete::<serde_json::Value, _, ()>(route, None)
            .await
            .map(|_| ())
            .map_err(|e| self.classify_error_sync(e))
    }

    async fn current_user(&self) -> Result<User> {
        let user = self
            .client
            .current()
            .user()
            .await
            .map_err(|e| self.classify_error_sync(e))?;
        Ok(User {
            login: user.login,
            id: user.id.0,
        })
    }

    async fn list_tags(&self, repo: &RepoRef) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct TagItem {
            name: String,
        }
        let route = format!("/repos/{}/{}/tags?per_page=100", repo.owner, repo.name);
        let tags: Vec<TagItem> = self
            .client
            .get(route, None::<&()>)
            .await
            .map_err(|e| self.classify_error_sync(e))?;
        Ok(tags.into_iter().map(|t| t.name).collect())
    }
}

impl GitHubClient {
    /// Synchronous-context error classification for call sites that can't
    /// await inside a `map_err` closure; skips the rate-limit side-channel
    /// fetch and reports the reset as unknown (the caller still retries via
    /// the generic transient path).
    fn classify_error_sync(&self, err: octocrab::Error) -> SyncError {
        match &err {
            octocrab::Error::GitHub { source, .. } => {
                let status = source.status_code.as_u16();
                match status {
                    429 => SyncError::RateLimited {
                        message: source.message.clone(),
                        reset_at: None,
                    },
                    401 | 403 => SyncError::Auth(source.message.clone()),
                    500..=599 => SyncError::Transient(source.message.clone()),
                    _ => SyncError::Validation(source.message.clone()),
                }
            }
            other => SyncError::Transient(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_branch_protection_messages() {
        assert!(looks_like_branch_protection("Protected branch update failed"));
        assert!(looks_like_branch_protection(
            "At least 1 required status check is expected"
        ));
        assert!(!looks_like_branch_protection("not found"));
    }

    #[test]
    fn env_token_validation() {
        std::env::remove_var("GITHUB_TOKEN");
        assert!(GitHubClient::try_environment_token().is_err());
        std::env::set_var("GITHUB_TOKEN", "ghp_abcdef");
        assert!(GitHubClient::try_environment_token().is_ok());
        std::env::remove_var("GITHUB_TOKEN");
    }
}
