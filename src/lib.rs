//! syncforge - template propagation and sync orchestration for GitHub repos
//!
//! syncforge keeps a set of target repositories' files and directories in
//! sync with the content of a single source repository, proposing the
//! result as pull requests rather than pushing directly to default
//! branches.
//!
//! ## Core components
//!
//! - [`config`]: YAML configuration schema (groups, targets, mappings) with
//!   XDG-compliant loading.
//! - [`discovery`]: reconstructs per-target sync status from the remote
//!   branch/PR namespace — no local persisted state.
//! - [`sync`]: the per-target pipeline (clone, collect, transform, diff,
//!   commit, push, PR).
//! - [`orchestrator`]: DAG scheduling and bounded-concurrency fan-out across
//!   a run's groups and targets.
//! - [`resilience`]: retry/backoff, rate-limit waits, cancellation, panic
//!   isolation.
//! - [`git`] / [`github`]: the narrow git and host-API surfaces the pipeline
//!   depends on, each behind a trait so tests can supply fakes.
//! - [`health`]: preflight checks ("doctor").
//! - [`daemon`]: background mode that runs the orchestrator on an interval.

pub mod branch;
pub mod config;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod exclude;
pub mod git;
pub mod github;
pub mod health;
pub mod model;
pub mod orchestrator;
pub mod resilience;
pub mod resolver;
pub mod sync;
pub mod transform;

pub use config::Config;
pub use daemon::{Daemon, DaemonStatus};
pub use error::{ErrorKind, SyncError};
pub use git::{CliGitClient, GitClient};
pub use github::GitHubClient;
pub use model::SyncSummary;

use std::time::Duration;

/// Builds the concrete adapters for `config` and runs one full orchestrator
/// pass over its groups. Shared by the CLI's `sync` command and the
/// daemon's periodic loop — the only difference between the two call sites
/// is what happens to the returned summary.
pub async fn run_from_config(config: &Config) -> anyhow::Result<model::SyncSummary> {
    run_from_config_filtered(config, &orchestrator::GroupFilter::none()).await
}

/// As [`run_from_config`], but with an explicit [`orchestrator::GroupFilter`]
/// composed on top of each group's `enabled` flag (spec §4.5's
/// `include_set`/`exclude_set`).
pub async fn run_from_config_filtered(
    config: &Config,
    filter: &orchestrator::GroupFilter,
) -> anyhow::Result<model::SyncSummary> {
    let host = github::GitHubClient::new(&config.auth.method).await?;
    let git: git::CliGitClient = git::CliGitClient::new();
    let resolver = resolver::Resolver::new(Duration::from_secs(config.advanced.module_cache_ttl_secs));
    let cancellation = resilience::CancellationContext::new(
        config.advanced.overall_timeout_secs.map(Duration::from_secs),
    );
    let retry_policy = resilience::RetryPolicy {
        max_attempts: config.advanced.retry_max_attempts,
        ..resilience::RetryPolicy::default()
    };

    let groups = config.clone().into_groups();

    let run_ctx = orchestrator::RunContext {
        host: &host,
        git: &git,
        resolver: &resolver,
        cancellation: &cancellation,
        retry_policy,
        api_timeout: Duration::from_secs(config.advanced.api_timeout_secs),
        clone_timeout: Duration::from_secs(config.advanced.clone_timeout_secs),
        dry_run: config.dry_run,
        allow_prerelease: config.advanced.allow_prerelease,
        workspace_root: config.workspace_root(),
    };

    let summary = orchestrator::run_filtered(&run_ctx, &groups, &config.branch_prefix, filter).await?;
    Ok(summary)
}
