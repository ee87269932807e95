//! Target Sync Pipeline (component D): for one `(group, target)` pair whose
//! state is `behind` or `pending`, clone the source, collect and transform
//! its mapped files, diff against the target's current content, and stage a
//! sync-branch commit that is pushed and proposed as a pull request.
//!
//! The bounded-parallelism-over-many-repos concurrency shape lives in
//! `orchestrator.rs`, which drives this module's per-target function; this
//! module itself is the sequential ten-step pipeline.

use crate::branch;
use crate::config::{DirectoryMapping, FileMapping, TargetConfig, TransformSpec};
use crate::discovery::TargetState;
use crate::error::{Result, SyncError};
use crate::exclude::ExcludeSet;
use crate::git::GitClient;
use crate::github::{CreatePrRequest, HostApi};
use crate::model::{RepoRef, TargetOutcome};
use crate::resilience::{self, CancellationContext, RetryPolicy};
use crate::resolver::Resolver;
use crate::transform::{TransformChain, TransformContext};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything the pipeline needs that isn't specific to one target: the
/// concrete adapters, the shared cancellation/retry knobs, and the run-wide
/// dry-run/prerelease flags.
pub struct PipelineContext<'a> {
    pub host: &'a dyn HostApi,
    pub git: &'a dyn GitClient,
    pub resolver: &'a Resolver,
    pub cancellation: &'a CancellationContext,
    pub retry_policy: RetryPolicy,
    pub api_timeout: Duration,
    pub clone_timeout: Duration,
    pub dry_run: bool,
    pub allow_prerelease: bool,
}

struct CollectedFile {
    dest: String,
    bytes: Vec<u8>,
}

/// Runs the full pipeline for one target and reduces every failure mode to
/// a `TargetOutcome` — the orchestrator iterates these rather than
/// propagating exceptions.
#[allow(clippy::too_many_arguments)]
pub async fn sync_target(
    ctx: &PipelineContext<'_>,
    source_repo: &RepoRef,
    source_branch: &str,
    source_commit: &str,
    target: &TargetConfig,
    target_state: &TargetState,
    branch_prefix: &str,
    pr_labels: &[String],
    group_transform_defaults: &TransformSpec,
    workspace_root: &Path,
) -> TargetOutcome {
    match sync_target_inner(
        ctx,
        source_repo,
        source_branch,
        source_commit,
        target,
        target_state,
        branch_prefix,
        pr_labels,
        group_transform_defaults,
        workspace_root,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(SyncError::Cancelled) => TargetOutcome::Skipped {
            reason: "cancelled".into(),
        },
        Err(e) => TargetOutcome::Failed {
            reason: e.to_string(),
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn sync_target_inner(
    ctx: &PipelineContext<'_>,
    source_repo: &RepoRef,
    source_branch: &str,
    source_commit: &str,
    target: &TargetConfig,
    target_state: &TargetState,
    branch_prefix: &str,
    pr_labels: &[String],
    group_transform_defaults: &TransformSpec,
    workspace_root: &Path,
) -> Result<TargetOutcome> {
    let target_repo = RepoRef::parse(&target.repo)
        .ok_or_else(|| SyncError::Validation(format!("malformed target repo: {}", target.repo)))?;

    // Step 1: workspace allocation. `TempDir` releases on every exit path,
    // including early returns via `?`, since it's dropped when this stack
    // frame unwinds.
    std::fs::create_dir_all(workspace_root)?;
    let workspace = tempfile::Builder::new()
        .prefix("syncforge-")
        .tempdir_in(workspace_root)?;

    ctx.cancellation.check()?;

    // Step 2: source clone. The only full-repo operation for the source;
    // every later read of its default-mapping content is filesystem-local.
    let source_dir = workspace.path().join("source");
    let source_url = format!("https://github.com/{}.git", source_repo.full_name());
    clone_with_retry(ctx, &source_url, &source_dir, source_branch).await?;

    // Step 3: file collection.
    let merged_transform = target.transform.merged_over(group_transform_defaults);
    let mut collected = Vec::new();

    for file in &target.files {
        collected.push(collect_file(&source_dir, file)?);
    }

    for dir in &target.directories {
        ctx.cancellation.check()?;
        let root = if let Some(module) = &dir.module {
            let resolved = resilience::with_retry(ctx.cancellation, &ctx.retry_policy, ctx.api_timeout, || {
                ctx.resolver.resolve(&source_repo.full_name(), &module.version, ctx.allow_prerelease, || async {
                    ctx.host.list_tags(source_repo).await
                })
            })
            .await?;
            info!(dir = %dir.src, module = %module.module_type, version = %resolved, "resolved module version");

            let module_dir = workspace
                .path()
                .join(format!("module-{}", sanitize_component(&dir.src)));
            clone_with_retry(ctx, &source_url, &module_dir, &resolved).await?;
            module_dir
        } else {
            source_dir.clone()
        };

        collected.extend(collect_directory(&root, dir)?);
    }

    // Step 4: transform. Each file's chain run is isolated — a transform
    // failure drops that one file and is logged, but does not fail the
    // target.
    let chain = TransformChain::from_spec(merged_transform.rewrite_repo_name);
    let mut transformed = Vec::with_capacity(collected.len());
    for file in collected {
        let tctx = TransformContext {
            source_repo: source_repo.full_name(),
            target_repo: target_repo.full_name(),
            file_path: file.dest.clone(),
            variables: merged_transform.variables.clone(),
        };
        match chain.run(&file.bytes, &tctx) {
            Ok(bytes) => transformed.push(CollectedFile { dest: file.dest, bytes }),
            Err(e) => warn!(path = %file.dest, error = %e, "transform failed for file, skipping it"),
        }
    }

    // Step 5: diff against the target's current content — the open sync
    // PR's head branch if one exists (so re-runs are idempotent updates to
    // the same PR), else the target's default branch.
    let diff_ref = target_state
        .open_sync_pr
        .as_ref()
        .map(|pr| pr.head_branch.clone())
        .unwrap_or_else(|| target.default_branch.clone());

    let mut remaining = Vec::with_capacity(transformed.len());
    for file in transformed {
        ctx.cancellation.check()?;
        let existing = resilience::with_retry(ctx.cancellation, &ctx.retry_policy, ctx.api_timeout, || {
            ctx.host.get_file(&target_repo, &file.dest, &diff_ref)
        })
        .await?;
        match existing {
            Some(current) if current.bytes == file.bytes => {
                debug!(path = %file.dest, "unchanged, dropping from sync set");
            }
            _ => remaining.push(file),
        }
    }

    if remaining.is_empty() {
        info!(target = %target_repo, "no files differ from target content, nothing to sync");
        return Ok(TargetOutcome::UpToDate);
    }

    let changed_paths: Vec<String> = remaining.iter().map(|f| f.dest.clone()).collect();

    // Step 6: branch name. Reuse the open sync PR's head branch if present
    // (branch-only update, per the Open Question decision in DESIGN.md);
    // otherwise mint a fresh one encoding the source commit.
    let branch_name = target_state
        .open_sync_pr
        .as_ref()
        .map(|pr| pr.head_branch.clone())
        .unwrap_or_else(|| branch::format(branch_prefix, Utc::now(), source_commit));

    if ctx.dry_run {
        let commit_message = build_commit_message(&source_repo.full_name(), source_commit, &remaining);
        info!(
            target = %target_repo,
            branch = %branch_name,
            files = ?changed_paths,
            commit_message = %commit_message,
            "dry run: would push this branch and open/update a PR",
        );
        return Ok(TargetOutcome::Succeeded {
            pr_url: None,
            files_changed: changed_paths,
        });
    }

    // Step 6 (cont'd) / Step 7: clone the target at the branch to update or
    // at its default branch, stage the files, and commit.
    let target_dir = workspace.path().join("target");
    let target_url = format!("https://github.com/{}.git", target_repo.full_name());
    let reusing_pr_branch = target_state.open_sync_pr.is_some();
    let clone_ref = if reusing_pr_branch { &branch_name } else { &target.default_branch };
    clone_with_retry(ctx, &target_url, &target_dir, clone_ref).await?;

    if !reusing_pr_branch {
        ctx.git.create_branch(&target_dir, &branch_name).await?;
    }

    let mut staged_paths = Vec::with_capacity(remaining.len());
    for file in &remaining {
        let full_path = target_dir.join(&file.dest);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full_path, &file.bytes)?;
        staged_paths.push(PathBuf::from(&file.dest));
    }
    ctx.git.add(&target_dir, &staged_paths).await?;

    let commit_message = build_commit_message(&source_repo.full_name(), source_commit, &remaining);
    ctx.git.commit(&target_dir, &commit_message).await?;

    // Step 8: push. A branch-protection rejection here is expected and
    // converted into the PR-creation remediation rather than a failure.
    let push_result = resilience::with_retry(ctx.cancellation, &ctx.retry_policy, ctx.api_timeout, || {
        ctx.git.push(&target_dir, "origin", &branch_name, false)
    })
    .await;
    match push_result {
        Ok(()) => {}
        Err(SyncError::BranchProtected(reason)) => {
            debug!(%reason, "push rejected as protected, proceeding to PR creation");
        }
        Err(e) => return Err(e),
    }

    // Step 9: PR. Reusing an existing open sync PR is a branch-only
    // update — the push above is the whole of the update, per the Open
    // Question decision.
    let pr_url = if let Some(open_pr) = &target_state.open_sync_pr {
        info!(pr = %open_pr.html_url, "existing sync PR found, branch updated in place");
        Some(open_pr.html_url.clone())
    } else {
        let title = format!(
            "chore(sync): files from {}@{}",
            source_repo.full_name(),
            short_sha(source_commit)
        );
        let body = build_pr_body(source_repo, source_commit, &branch_name, &remaining);
        let created = resilience::with_retry(ctx.cancellation, &ctx.retry_policy, ctx.api_timeout, || {
            ctx.host.create_pr(
                &target_repo,
                CreatePrRequest {
                    head: branch_name.clone(),
                    base: target.default_branch.clone(),
                    title: title.clone(),
                    body: body.clone(),
                    labels: pr_labels.to_vec(),
                },
            )
        })
        .await?;
        info!(pr = %created.html_url, "opened sync pull request");
        Some(created.html_url)
    };

    // Step 10: release happens implicitly — `workspace` drops at the end
    // of this function's scope.
    Ok(TargetOutcome::Succeeded {
        pr_url,
        files_changed: changed_paths,
    })
}

/// Clones `git_ref` of `url` into `dest_dir`, retrying transient failures.
/// A half-finished directory from a prior attempt is removed first since
/// `git clone` refuses to clone into a non-empty directory.
async fn clone_with_retry(ctx: &PipelineContext<'_>, url: &str, dest_dir: &Path, git_ref: &str) -> Result<()> {
    resilience::with_retry(ctx.cancellation, &ctx.retry_policy, ctx.clone_timeout, || async {
        if dest_dir.exists() {
            std::fs::remove_dir_all(dest_dir).map_err(SyncError::Io)?;
        }
        ctx.git.clone_repo(url, dest_dir, git_ref).await
    })
    .await
}

fn collect_file(source_dir: &Path, mapping: &FileMapping) -> Result<CollectedFile> {
    let full_path = source_dir.join(&mapping.src);
    let bytes = std::fs::read(&full_path).map_err(|e| SyncError::Transform {
        path: mapping.src.clone(),
        reason: e.to_string(),
    })?;
    Ok(CollectedFile {
        dest: mapping.dest.clone(),
        bytes,
    })
}

/// Walks `mapping.src` under `root`, applying `mapping.exclude` with
/// gitignore semantics, and renames each surviving file onto
/// `mapping.dest`.
fn collect_directory(root: &Path, mapping: &DirectoryMapping) -> Result<Vec<CollectedFile>> {
    let exclude = ExcludeSet::compile(&mapping.exclude)
        .map_err(|e| SyncError::Validation(format!("invalid exclude pattern for '{}': {e}", mapping.src)))?;
    let src_root = root.join(&mapping.src);
    if !src_root.exists() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    let walker = walkdir::WalkDir::new(&src_root).into_iter().filter_entry(|entry| {
        let rel = entry
            .path()
            .strip_prefix(&src_root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if rel.is_empty() {
            return true;
        }
        !exclude.is_excluded(&rel, entry.file_type().is_dir())
    });

    for entry in walker {
        let entry = entry.map_err(|e| SyncError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(&src_root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if exclude.is_excluded(&rel, false) {
            continue;
        }
        let bytes = std::fs::read(entry.path())?;
        let dest = format!("{}/{}", mapping.dest.trim_end_matches('/'), rel);
        out.push(CollectedFile { dest, bytes });
    }
    Ok(out)
}

fn sanitize_component(path: &str) -> String {
    path.chars().map(|c| if c.is_alphanumeric() { c } else { '-' }).collect()
}

fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(12)]
}

/// Bit-stable commit message: first line, blank line, then one
/// `- <dest_path>` per changed file.
fn build_commit_message(source_repo: &str, source_commit: &str, files: &[CollectedFile]) -> String {
    let mut msg = format!("chore(sync): files from {source_repo}@{}\n\n", short_sha(source_commit));
    for f in files {
        msg.push_str("- ");
        msg.push_str(&f.dest);
        msg.push('\n');
    }
    msg.trim_end().to_string()
}

/// PR body: a YAML front-matter block followed by human-readable prose.
fn build_pr_body(source_repo: &RepoRef, source_commit: &str, branch_name: &str, files: &[CollectedFile]) -> String {
    let files_yaml: String = files.iter().map(|f| format!("  - {}\n", f.dest)).collect();
    format!(
        "---\nsource_repo: {}\nsource_commit: {}\nbranch: {}\nfiles_changed:\n{}---\n\n\
This pull request was opened automatically by syncforge to propagate changes \
from `{}`.\n\n{} file(s) changed.\n",
        source_repo.full_name(),
        source_commit,
        branch_name,
        files_yaml,
        source_repo.full_name(),
        files.len(),
    )
}
