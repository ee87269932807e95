//! Shared integration-test scaffolding: config fixture builders and
//! in-memory fakes for the `HostApi`/`GitClient` traits, so the orchestrator
//! can be driven end-to-end without hitting GitHub or shelling out to `git`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use syncforge::config::{FileMapping, GroupConfig, GroupGlobalConfig, SourceConfig, TargetConfig, TransformSpec};
use syncforge::error::{Result, SyncError};
use syncforge::git::GitClient;
use syncforge::github::{Branch, CreatePrRequest, FileContent, HostApi, PrState, PullRequest, Tree, User};
use syncforge::model::RepoRef;

/// Builds a minimal, valid `GroupConfig` for a test scenario.
pub fn basic_group(
    id: &str,
    priority: i32,
    depends_on: &[&str],
    source_repo: &str,
    targets: Vec<TargetConfig>,
) -> GroupConfig {
    GroupConfig {
        id: id.to_string(),
        name: id.to_string(),
        priority,
        enabled: true,
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        source: SourceConfig { repo: source_repo.to_string(), branch: "main".to_string() },
        targets,
        transform_defaults: TransformSpec::default(),
        global: GroupGlobalConfig::default(),
    }
}

/// A single-file target with its default branch set to `main`.
pub fn file_target(repo: &str, src: &str, dest: &str) -> TargetConfig {
    TargetConfig {
        repo: repo.to_string(),
        default_branch: "main".to_string(),
        files: vec![FileMapping { src: src.to_string(), dest: dest.to_string() }],
        directories: vec![],
        transform: TransformSpec::default(),
    }
}

/// An in-memory `HostApi`: branches/files/PRs/tags live in plain maps behind
/// a `Mutex`, so a test can both seed remote state and assert on what the
/// orchestrator actually did (PRs created, branches queried).
#[derive(Default)]
pub struct FakeHostApi {
    branches: Mutex<HashMap<String, Vec<Branch>>>,
    files: Mutex<HashMap<(String, String, String), Vec<u8>>>,
    prs: Mutex<HashMap<String, Vec<PullRequest>>>,
    tags: Mutex<HashMap<String, Vec<String>>>,
    created_prs: Mutex<Vec<(String, CreatePrRequest)>>,
}

impl FakeHostApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_branch(&self, repo: &str, name: &str, tip_sha: &str) {
        self.branches
            .lock()
            .unwrap()
            .entry(repo.to_string())
            .or_default()
            .push(Branch { name: name.to_string(), protected: false, tip_sha: tip_sha.to_string() });
    }

    #[allow(dead_code)]
    pub fn set_file(&self, repo: &str, path: &str, git_ref: &str, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert((repo.to_string(), path.to_string(), git_ref.to_string()), bytes.to_vec());
    }

    pub fn created_pr_count(&self) -> usize {
        self.created_prs.lock().unwrap().len()
    }
}

#[async_trait]
impl HostApi for FakeHostApi {
    async fn list_branches(&self, repo: &RepoRef) -> Result<Vec<Branch>> {
        Ok(self.branches.lock().unwrap().get(&repo.full_name()).cloned().unwrap_or_default())
    }

    async fn get_branch(&self, repo: &RepoRef, name: &str) -> Result<Branch> {
        self.branches
            .lock()
            .unwrap()
            .get(&repo.full_name())
            .and_then(|bs| bs.iter().find(|b| b.name == name).cloned())
            .ok_or_else(|| SyncError::Validation(format!("no such branch: {name}")))
    }

    async fn get_file(&self, repo: &RepoRef, path: &str, git_ref: &str) -> Result<Option<FileContent>> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(&(repo.full_name(), path.to_string(), git_ref.to_string()))
            .cloned()
            .map(|bytes| FileContent { bytes }))
    }

    async fn get_tree(&self, _repo: &RepoRef, _git_ref: &str, _recursive: bool) -> Result<Tree> {
        Ok(Tree::default())
    }

    async fn list_prs(&self, repo: &RepoRef, state: PrState) -> Result<Vec<PullRequest>> {
        let prs = self.prs.lock().unwrap().get(&repo.full_name()).cloned().unwrap_or_default();
        Ok(match state {
            PrState::Open => prs.into_iter().filter(|p| p.open).collect(),
            PrState::Closed => prs.into_iter().filter(|p| !p.open).collect(),
            PrState::All => prs,
        })
    }

    async fn create_pr(&self, repo: &RepoRef, req: CreatePrRequest) -> Result<PullRequest> {
        let number = self.created_prs.lock().unwrap().len() as u64 + 1;
        let pr = PullRequest {
            number,
            html_url: format!("https://github.com/{}/pull/{number}", repo.full_name()),
            head_branch: req.head.clone(),
            base_branch: req.base.clone(),
            title: req.title.clone(),
            open: true,
        };
        self.prs.lock().unwrap().entry(repo.full_name()).or_default().push(pr.clone());
        self.created_prs.lock().unwrap().push((repo.full_name(), req));
        Ok(pr)
    }

    async fn delete_branch(&self, repo: &RepoRef, name: &str) -> Result<()> {
        if let Some(prs) = self.prs.lock().unwrap().get_mut(&repo.full_name()) {
            prs.retain(|p| p.head_branch != name);
        }
        Ok(())
    }

    async fn current_user(&self) -> Result<User> {
        Ok(User { login: "syncforge-bot".into(), id: 1 })
    }

    async fn list_tags(&self, repo: &RepoRef) -> Result<Vec<String>> {
        Ok(self.tags.lock().unwrap().get(&repo.full_name()).cloned().unwrap_or_default())
    }
}

/// An in-memory `GitClient`: `clone_repo` materializes a seeded file tree
/// onto disk so the sync pipeline's filesystem reads (`collect_file`,
/// `collect_directory`) see real bytes, without ever shelling out to `git`.
#[derive(Default)]
pub struct FakeGitClient {
    trees: Mutex<HashMap<(String, String), HashMap<String, Vec<u8>>>>,
    dir_origin: Mutex<HashMap<PathBuf, String>>,
    pushes: Mutex<Vec<(String, String)>>,
    push_attempts: Mutex<u32>,
    protect_all_pushes: Mutex<bool>,
    clone_calls: Mutex<u32>,
}

impl FakeGitClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the tree `clone_repo` will materialize for `(url, git_ref)`.
    pub fn seed_tree(&self, url: &str, git_ref: &str, files: &[(&str, &[u8])]) {
        let map = files.iter().map(|(p, b)| (p.to_string(), b.to_vec())).collect();
        self.trees.lock().unwrap().insert((url.to_string(), git_ref.to_string()), map);
    }

    /// Makes every subsequent `push` fail as if rejected by branch protection.
    pub fn protect_all_pushes(&self) {
        *self.protect_all_pushes.lock().unwrap() = true;
    }

    pub fn clone_call_count(&self) -> u32 {
        *self.clone_calls.lock().unwrap()
    }

    pub fn push_attempt_count(&self) -> u32 {
        *self.push_attempts.lock().unwrap()
    }

    #[allow(dead_code)]
    pub fn pushed_branches(&self) -> Vec<(String, String)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitClient for FakeGitClient {
    async fn clone_repo(&self, url: &str, dest_dir: &Path, git_ref: &str) -> Result<()> {
        *self.clone_calls.lock().unwrap() += 1;
        let tree = {
            let trees = self.trees.lock().unwrap();
            trees
                .get(&(url.to_string(), git_ref.to_string()))
                .cloned()
                .ok_or_else(|| SyncError::Transient(format!("no such ref {git_ref} for {url}")))?
        };
        std::fs::create_dir_all(dest_dir).map_err(SyncError::Io)?;
        for (path, bytes) in &tree {
            let full = dest_dir.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).map_err(SyncError::Io)?;
            }
            std::fs::write(&full, bytes).map_err(SyncError::Io)?;
        }
        self.dir_origin.lock().unwrap().insert(dest_dir.to_path_buf(), url.to_string());
        Ok(())
    }

    async fn checkout(&self, _dir: &Path, _git_ref: &str) -> Result<()> {
        Ok(())
    }

    async fn create_branch(&self, _dir: &Path, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn add(&self, _dir: &Path, _paths: &[PathBuf]) -> Result<()> {
        Ok(())
    }

    async fn commit(&self, _dir: &Path, _message: &str) -> Result<()> {
        Ok(())
    }

    async fn push(&self, dir: &Path, _remote: &str, branch: &str, _force: bool) -> Result<()> {
        *self.push_attempts.lock().unwrap() += 1;
        if *self.protect_all_pushes.lock().unwrap() {
            return Err(SyncError::BranchProtected(format!("{branch} is protected")));
        }
        let url = self.dir_origin.lock().unwrap().get(dir).cloned().unwrap_or_default();
        self.pushes.lock().unwrap().push((url, branch.to_string()));
        Ok(())
    }

    async fn current_commit_sha(&self, _dir: &Path) -> Result<String> {
        Ok("0".repeat(40))
    }

    async fn diff(&self, _dir: &Path, _ref_a: &str, _ref_b: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn changed_files(&self, _dir: &Path) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// A 40-character SHA built from a short label, so tests read clearly while
/// still satisfying `branch::format`'s 12-char slicing.
pub fn fake_sha(label: &str) -> String {
    let mut s: String = label.chars().take(12).collect();
    while s.len() < 12 {
        s.push('0');
    }
    s + &"0".repeat(28)
}

pub fn clone_url(repo: &str) -> String {
    format!("https://github.com/{repo}.git")
}
