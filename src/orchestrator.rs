//! Group Orchestrator (component E): builds the dependency DAG over
//! configured groups, runs them in topological order, and fans out each
//! group's targets with bounded concurrency.
//!
//! Drives many targets concurrently with `futures::stream::FuturesUnordered`,
//! with a topological-sort layer in front of it for group-level sequencing.

use crate::config::GroupConfig;
use crate::discovery::{self, TargetState};
use crate::error::{Result, SyncError};
use crate::git::GitClient;
use crate::github::HostApi;
use crate::model::{GroupResult, GroupStatus, RepoRef, SourceSpec, SyncSummary, TargetOutcome, TargetResult};
use crate::resilience::{self, CancellationContext, RetryPolicy};
use crate::resolver::Resolver;
use crate::sync::{self, PipelineContext};
use chrono::Utc;
use futures::future::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// A topologically-ordered schedule over a group list, with cycle detection
/// performed up front so the orchestrator never discovers a cycle mid-run.
pub struct Schedule {
    /// Group ids in an order where every group appears after all of its
    /// `depends_on` entries, ties broken by priority (ascending) then
    /// declaration order.
    pub order: Vec<String>,
}

impl Schedule {
    /// Kahn's algorithm. Detects cycles by naming every group left
    /// unscheduled when no more zero-indegree nodes remain.
    pub fn build(groups: &[GroupConfig]) -> Result<Schedule> {
        let index_of: HashMap<&str, usize> = groups
            .iter()
            .enumerate()
            .map(|(i, g)| (g.id.as_str(), i))
            .collect();

        let mut indegree = vec![0usize; groups.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); groups.len()];
        for (i, group) in groups.iter().enumerate() {
            for dep in &group.depends_on {
                let dep_idx = *index_of
                    .get(dep.as_str())
                    .ok_or_else(|| SyncError::Validation(format!("group '{}' depends_on unknown group '{}'", group.id, dep)))?;
                dependents[dep_idx].push(i);
                indegree[i] += 1;
            }
        }

        let mut ready: Vec<usize> = (0..groups.len()).filter(|&i| indegree[i] == 0).collect();
        sort_ready(&mut ready, groups);

        let mut order = Vec::with_capacity(groups.len());
        let mut scheduled = vec![false; groups.len()];

        while let Some(next_idx) = ready.first().copied() {
            ready.remove(0);
            scheduled[next_idx] = true;
            order.push(groups[next_idx].id.clone());

            let mut newly_ready = Vec::new();
            for &dependent in &dependents[next_idx] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    newly_ready.push(dependent);
                }
            }
            ready.extend(newly_ready);
            sort_ready(&mut ready, groups);
        }

        if order.len() != groups.len() {
            let cycle_members: Vec<String> = (0..groups.len())
                .filter(|&i| !scheduled[i])
                .map(|i| groups[i].id.clone())
                .collect();
            return Err(SyncError::Validation(format!(
                "dependency cycle detected among groups: {}",
                cycle_members.join(", ")
            )));
        }

        Ok(Schedule { order })
    }
}

/// Stable tiebreak: lower `priority` first (ascending = earlier), then
/// declaration order (index in the original `groups` slice).
fn sort_ready(ready: &mut [usize], groups: &[GroupConfig]) {
    ready.sort_by(|&a, &b| groups[a].priority.cmp(&groups[b].priority).then(a.cmp(&b)));
}

/// Everything a whole run needs that outlives any single group or target.
pub struct RunContext<'a> {
    pub host: &'a dyn HostApi,
    pub git: &'a dyn GitClient,
    pub resolver: &'a Resolver,
    pub cancellation: &'a CancellationContext,
    pub retry_policy: RetryPolicy,
    pub api_timeout: Duration,
    pub clone_timeout: Duration,
    pub dry_run: bool,
    pub allow_prerelease: bool,
    pub workspace_root: PathBuf,
}

/// Optional group-name/id filters applied on top of each group's own
/// `enabled` flag, per §4.5: "the orchestrator accepts an optional
/// `include_set` (run only these group names/IDs) and `exclude_set` (skip
/// these); filters compose with `enabled`." An empty `include` means "no
/// include filter" (everything is a candidate); a non-empty `include` means
/// only those names/ids are candidates. `exclude` always removes candidates,
/// whether or not `include` is set.
#[derive(Debug, Clone, Default)]
pub struct GroupFilter {
    pub include: HashSet<String>,
    pub exclude: HashSet<String>,
}

impl GroupFilter {
    pub fn none() -> Self {
        Self::default()
    }

    fn admits(&self, group: &GroupConfig) -> bool {
        let matches = |set: &HashSet<String>| set.contains(&group.id) || set.contains(&group.name);
        if !self.include.is_empty() && !matches(&self.include) {
            return false;
        }
        !matches(&self.exclude)
    }
}

/// Runs every group in `groups` according to its dependency schedule,
/// skipping (not failing) groups whose dependencies did not all succeed,
/// per the Open Question decision on disabled-group auto-satisfaction: a
/// disabled group is treated as satisfied so its dependents still run.
pub async fn run(ctx: &RunContext<'_>, groups: &[GroupConfig], branch_prefix: &str) -> Result<SyncSummary> {
    run_filtered(ctx, groups, branch_prefix, &GroupFilter::none()).await
}

/// As [`run`], but a group filtered out by `filter` (via `include`/`exclude`)
/// is treated exactly like a disabled group: absent from the DAG, and
/// auto-satisfied so its dependents still run.
pub async fn run_filtered(
    ctx: &RunContext<'_>,
    groups: &[GroupConfig],
    branch_prefix: &str,
    filter: &GroupFilter,
) -> Result<SyncSummary> {
    let started_at = Utc::now();
    let schedule = Schedule::build(groups)?;
    let by_id: HashMap<&str, &GroupConfig> = groups.iter().map(|g| (g.id.as_str(), g)).collect();

    let mut results: HashMap<String, GroupResult> = HashMap::new();
    let mut satisfied: HashSet<String> = HashSet::new();

    for group_id in &schedule.order {
        let group = by_id[group_id.as_str()];
        ctx.cancellation.check()?;

        if !group.enabled || !filter.admits(group) {
            info!(group = %group.id, "group disabled, treated as satisfied for dependents");
            satisfied.insert(group.id.clone());
            results.insert(
                group.id.clone(),
                GroupResult {
                    group_id: group.id.clone(),
                    status: GroupStatus::Disabled,
                    targets: Vec::new(),
                },
            );
            continue;
        }

        let blocking_deps: Vec<&String> = group.depends_on.iter().filter(|d| !satisfied.contains(*d)).collect();
        if !blocking_deps.is_empty() {
            warn!(group = %group.id, deps = ?blocking_deps, "skipping group: upstream dependency did not succeed");
            results.insert(
                group.id.clone(),
                GroupResult {
                    group_id: group.id.clone(),
                    status: GroupStatus::Skipped,
                    targets: Vec::new(),
                },
            );
            continue;
        }

        let group_result = run_group(ctx, group, branch_prefix).await;
        // Per §4.5, a group "fails" for propagation purposes if *any* of its
        // targets produced a non-recoverable error — not only when every
        // target did (status `Failed`). A `Partial` group still blocks its
        // dependents even though its own run is reported as partial rather
        // than failed.
        if group_result.status != GroupStatus::Failed && group_result.failed_target_count() == 0 {
            satisfied.insert(group.id.clone());
        }
        results.insert(group.id.clone(), group_result);
    }

    let groups_out = schedule
        .order
        .iter()
        .filter_map(|id| results.remove(id))
        .collect();

    Ok(SyncSummary {
        groups: groups_out,
        started_at,
        ended_at: Utc::now(),
        dry_run: ctx.dry_run,
    })
}

/// Runs discovery then the sync pipeline for one group's targets, with
/// `global.max_concurrency` bounding how many targets are in flight at
/// once via `FuturesUnordered`.
async fn run_group(ctx: &RunContext<'_>, group: &GroupConfig, branch_prefix: &str) -> GroupResult {
    let source_repo = match RepoRef::parse(&group.source.repo) {
        Some(r) => r,
        None => {
            return GroupResult {
                group_id: group.id.clone(),
                status: GroupStatus::Failed,
                targets: Vec::new(),
            }
        }
    };
    let source_spec = SourceSpec {
        repo: source_repo.clone(),
        branch: group.source.branch.clone(),
    };

    let target_repos: Result<Vec<RepoRef>> = group
        .targets
        .iter()
        .map(|t| RepoRef::parse(&t.repo).ok_or_else(|| SyncError::Validation(format!("malformed target repo: {}", t.repo))))
        .collect();
    let target_repos = match target_repos {
        Ok(t) => t,
        Err(_) => {
            return GroupResult {
                group_id: group.id.clone(),
                status: GroupStatus::Failed,
                targets: Vec::new(),
            }
        }
    };

    let state = match resilience::with_retry(ctx.cancellation, &ctx.retry_policy, ctx.api_timeout, || {
        discovery::discover(ctx.host, &source_spec, &target_repos, branch_prefix)
    })
    .await
    {
        Ok(s) => s,
        Err(e) => {
            warn!(group = %group.id, error = %e, "discovery failed for group");
            return GroupResult {
                group_id: group.id.clone(),
                status: GroupStatus::Failed,
                targets: Vec::new(),
            };
        }
    };

    let source_commit = state.source.latest_commit.clone();
    let max_concurrency = group.global.max_concurrency.max(1);
    let group_workspace = ctx.workspace_root.join(&group.id);

    let mut in_flight = FuturesUnordered::new();
    let mut pending: Vec<_> = group.targets.iter().zip(target_repos.iter()).collect();
    pending.reverse();
    let mut outcomes: Vec<TargetResult> = Vec::with_capacity(group.targets.len());

    let missing_state_fallback = TargetState {
        last_sync_commit_prefix: None,
        status: crate::discovery::TargetStatus::Unknown,
        open_sync_pr: None,
    };

    while !pending.is_empty() || !in_flight.is_empty() {
        while in_flight.len() < max_concurrency {
            let Some((target, target_repo)) = pending.pop() else { break };
            let target_state = state
                .targets
                .get(&target_repo.full_name())
                .cloned()
                .unwrap_or_else(|| missing_state_fallback.clone());

            if matches!(target_state.status, crate::discovery::TargetStatus::UpToDate) {
                outcomes.push(TargetResult {
                    repo: target_repo.clone(),
                    outcome: TargetOutcome::UpToDate,
                });
                continue;
            }
            if matches!(target_state.status, crate::discovery::TargetStatus::Unknown) {
                outcomes.push(TargetResult {
                    repo: target_repo.clone(),
                    outcome: TargetOutcome::Failed {
                        reason: "target state could not be discovered".into(),
                    },
                });
                continue;
            }

            let pipeline_ctx = PipelineContext {
                host: ctx.host,
                git: ctx.git,
                resolver: ctx.resolver,
                cancellation: ctx.cancellation,
                retry_policy: ctx.retry_policy,
                api_timeout: ctx.api_timeout,
                clone_timeout: ctx.clone_timeout,
                dry_run: ctx.dry_run,
                allow_prerelease: ctx.allow_prerelease,
            };
            let target = target.clone();
            let target_repo = target_repo.clone();
            let source_repo = source_repo.clone();
            let source_branch = source_spec.branch.clone();
            let source_commit = source_commit.clone();
            let branch_prefix = branch_prefix.to_string();
            let pr_labels = group.global.pr_labels.clone();
            let transform_defaults = group.transform_defaults.clone();
            let workspace_root = group_workspace.clone();

            in_flight.push(async move {
                // `isolate` catches a panic anywhere in the pipeline and
                // turns it into a `TargetOutcome::Failed` instead of letting
                // it unwind through this `FuturesUnordered` poll loop and
                // take down the whole group.
                let outcome = match resilience::isolate(sync::sync_target(
                    &pipeline_ctx,
                    &source_repo,
                    &source_branch,
                    &source_commit,
                    &target,
                    &target_state,
                    &branch_prefix,
                    &pr_labels,
                    &transform_defaults,
                    &workspace_root,
                ).map(Ok))
                .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => TargetOutcome::Failed { reason: e.to_string() },
                };
                TargetResult { repo: target_repo, outcome }
            });
        }

        if let Some(result) = in_flight.next().await {
            info!(target = %result.repo, outcome = ?result.outcome, "target sync finished");
            outcomes.push(result);
        }
    }

    let status = if outcomes.iter().all(|t| matches!(t.outcome, TargetOutcome::UpToDate)) && !outcomes.is_empty() {
        GroupStatus::Succeeded
    } else if outcomes.iter().any(|t| t.outcome.is_failure()) {
        if outcomes.iter().all(|t| t.outcome.is_failure()) {
            GroupStatus::Failed
        } else {
            GroupStatus::Partial
        }
    } else {
        GroupStatus::Succeeded
    };

    GroupResult {
        group_id: group.id.clone(),
        status,
        targets: outcomes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GroupGlobalConfig, SourceConfig, TargetConfig, TransformSpec};

    fn group(id: &str, priority: i32, depends_on: &[&str]) -> GroupConfig {
        GroupConfig {
            id: id.to_string(),
            name: id.to_string(),
            priority,
            enabled: true,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            source: SourceConfig { repo: "acme/source".into(), branch: "main".into() },
            targets: Vec::new(),
            transform_defaults: TransformSpec::default(),
            global: GroupGlobalConfig::default(),
        }
    }

    #[test]
    fn schedules_dependencies_before_dependents() {
        let groups = vec![group("a", 100, &[]), group("b", 100, &["a"]), group("c", 100, &["b"])];
        let schedule = Schedule::build(&groups).unwrap();
        assert_eq!(schedule.order, vec!["a", "b", "c"]);
    }

    #[test]
    fn lower_priority_value_runs_earlier_among_ready_groups() {
        let groups = vec![group("low", 10, &[]), group("high", 200, &[])];
        let schedule = Schedule::build(&groups).unwrap();
        assert_eq!(schedule.order, vec!["low", "high"]);
    }

    #[test]
    fn detects_cycles_and_names_all_members() {
        let groups = vec![group("a", 100, &["b"]), group("b", 100, &["a"])];
        let err = Schedule::build(&groups).unwrap_err();
        match err {
            SyncError::Validation(msg) => {
                assert!(msg.contains('a') && msg.contains('b'));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn declaration_order_breaks_ties_among_equal_priority() {
        let groups = vec![group("first", 100, &[]), group("second", 100, &[])];
        let schedule = Schedule::build(&groups).unwrap();
        assert_eq!(schedule.order, vec!["first", "second"]);
    }

    #[test]
    fn group_filter_with_empty_include_admits_everything_but_excluded() {
        let filter = GroupFilter {
            include: HashSet::new(),
            exclude: ["b".to_string()].into_iter().collect(),
        };
        assert!(filter.admits(&group("a", 100, &[])));
        assert!(!filter.admits(&group("b", 100, &[])));
    }

    #[test]
    fn group_filter_with_include_set_admits_only_named_groups() {
        let filter = GroupFilter {
            include: ["a".to_string()].into_iter().collect(),
            exclude: HashSet::new(),
        };
        assert!(filter.admits(&group("a", 100, &[])));
        assert!(!filter.admits(&group("b", 100, &[])));
    }

    #[test]
    fn group_filter_exclude_overrides_include() {
        let filter = GroupFilter {
            include: ["a".to_string()].into_iter().collect(),
            exclude: ["a".to_string()].into_iter().collect(),
        };
        assert!(!filter.admits(&group("a", 100, &[])));
    }
}
