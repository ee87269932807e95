//! State Discoverer (component B): reconstructs per-target sync status by
//! inspecting the remote branch namespace and open PRs — no local state.
//!
//! Narrowed to one concrete algorithm over one host API, since targets here
//! come from config rather than from enumerating an account.

use crate::branch;
use crate::error::Result;
use crate::github::{HostApi, PrState};
use crate::model::{RepoRef, SourceSpec};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    UpToDate,
    Behind,
    Pending,
    Conflicted,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct OpenSyncPr {
    pub number: u64,
    pub head_branch: String,
    pub html_url: String,
}

#[derive(Debug, Clone)]
pub struct TargetState {
    pub last_sync_commit_prefix: Option<String>,
    pub status: TargetStatus,
    pub open_sync_pr: Option<OpenSyncPr>,
}

#[derive(Debug, Clone)]
pub struct SourceState {
    pub repo: RepoRef,
    pub branch: String,
    pub latest_commit: String,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct State {
    pub source: SourceState,
    pub targets: HashMap<String, TargetState>,
}

/// Runs discovery against every target, for one source and sync-branch
/// prefix. A target whose branch/PR listing fails after retries
/// (the caller is expected to have already retried via `resilience`) is
/// recorded as `Unknown` rather than aborting discovery for the rest.
pub async fn discover(
    host: &dyn HostApi,
    source: &SourceSpec,
    targets: &[RepoRef],
    branch_prefix: &str,
) -> Result<State> {
    let source_branch = host.get_branch(&source.repo, &source.branch).await?;
    let source_state = SourceState {
        repo: source.repo.clone(),
        branch: source.branch.clone(),
        latest_commit: source_branch.tip_sha.clone(),
        checked_at: Utc::now(),
    };

    let mut target_states = HashMap::with_capacity(targets.len());
    for target in targets {
        let state = discover_target(host, target, &source_state.latest_commit, branch_prefix).await;
        target_states.insert(target.full_name(), state);
    }

    Ok(State {
        source: source_state,
        targets: target_states,
    })
}

async fn discover_target(
    host: &dyn HostApi,
    target: &RepoRef,
    source_commit: &str,
    branch_prefix: &str,
) -> TargetState {
    let branches = match host.list_branches(target).await {
        Ok(b) => b,
        Err(e) => {
            warn!(target = %target, error = %e, "failed to list branches, marking target unknown");
            return TargetState {
                last_sync_commit_prefix: None,
                status: TargetStatus::Unknown,
                open_sync_pr: None,
            };
        }
    };

    let newest_sync_branch = branches
        .iter()
        .filter(|b| branch::has_prefix(&b.name, branch_prefix))
        .filter_map(|b| branch::parse(&b.name))
        .max_by_key(|parsed| parsed.timestamp);

    let last_sync_commit_prefix = newest_sync_branch.map(|b| b.sha_prefix);

    let prs = match host.list_prs(target, PrState::Open).await {
        Ok(p) => p,
        Err(e) => {
            warn!(target = %target, error = %e, "failed to list PRs, marking target unknown");
            return TargetState {
                last_sync_commit_prefix,
                status: TargetStatus::Unknown,
                open_sync_pr: None,
            };
        }
    };

    let open_sync_pr = prs
        .into_iter()
        .find(|pr| branch::has_prefix(&pr.head_branch, branch_prefix))
        .map(|pr| OpenSyncPr {
            number: pr.number,
            head_branch: pr.head_branch,
            html_url: pr.html_url,
        });

    let status = determine_status(&last_sync_commit_prefix, source_commit, open_sync_pr.is_some());
    debug!(target = %target, ?status, "discovered target state");

    TargetState {
        last_sync_commit_prefix,
        status,
        open_sync_pr,
    }
}

fn determine_status(
    last_sync_commit_prefix: &Option<String>,
    source_commit: &str,
    has_open_pr: bool,
) -> TargetStatus {
    match last_sync_commit_prefix {
        Some(prefix) if source_commit.starts_with(prefix.as_str()) => TargetStatus::UpToDate,
        _ if has_open_pr => TargetStatus::Pending,
        _ => TargetStatus::Behind,
    }
}
