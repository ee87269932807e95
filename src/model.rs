//! Shared domain types used across the config, discovery, sync, and
//! orchestrator modules: the repository reference, source descriptor, and
//! the produced sync result records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `{owner, name}`, with a canonical `owner/name` string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parses `owner/name`. Returns `None` if the string doesn't contain
    /// exactly one `/`.
    pub fn parse(full_name: &str) -> Option<Self> {
        let (owner, name) = full_name.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(owner, name))
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// `{repo, branch}`. The branch's tip commit is the *source commit*.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub repo: RepoRef,
    pub branch: String,
}

/// Per-target, per-run outcome, as a sum type: the orchestrator iterates
/// results rather than catching exceptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    Succeeded { pr_url: Option<String>, files_changed: Vec<String> },
    UpToDate,
    Failed { reason: String },
    Skipped { reason: String },
}

impl TargetOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TargetOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResult {
    pub repo: RepoRef,
    pub outcome: TargetOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Succeeded,
    Partial,
    Failed,
    Skipped,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResult {
    pub group_id: String,
    pub status: GroupStatus,
    pub targets: Vec<TargetResult>,
}

impl GroupResult {
    pub fn failed_target_count(&self) -> usize {
        self.targets.iter().filter(|t| t.outcome.is_failure()).count()
    }
}

/// The top-level produced record: `{groups, started_at, ended_at, dry_run}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    pub groups: Vec<GroupResult>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
    pub dry_run: bool,
}

impl SyncSummary {
    /// `succeeded` iff no group and no target failed.
    pub fn overall_succeeded(&self) -> bool {
        self.groups.iter().all(|g| {
            g.status != GroupStatus::Failed
                && g.targets
                    .iter()
                    .all(|t| !matches!(t.outcome, TargetOutcome::Failed { .. }))
        })
    }
}
