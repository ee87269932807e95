//! End-to-end integration tests: config validation, DAG scheduling, and
//! orchestrator runs against the in-memory `HostApi`/`GitClient` fakes in
//! `tests/common`. No network access and no `git` subprocess involved.

mod common;

use std::time::Duration;

use syncforge::config::Config;
use syncforge::model::TargetOutcome;
use syncforge::orchestrator::{self, RunContext, Schedule};
use syncforge::resilience::{CancellationContext, RetryPolicy};
use syncforge::resolver::Resolver;

use common::{basic_group, clone_url, fake_sha, file_target, FakeGitClient, FakeHostApi};

const BRANCH_PREFIX: &str = "chore/sync-files";

fn test_retry_policy() -> RetryPolicy {
    RetryPolicy {
        base: Duration::from_millis(1),
        factor: 2.0,
        jitter: 0.0,
        cap: Duration::from_millis(5),
        max_attempts: 2,
    }
}

fn run_context<'a>(
    host: &'a FakeHostApi,
    git: &'a FakeGitClient,
    resolver: &'a Resolver,
    cancellation: &'a CancellationContext,
    workspace_root: std::path::PathBuf,
    dry_run: bool,
) -> RunContext<'a> {
    RunContext {
        host,
        git,
        resolver,
        cancellation,
        retry_policy: test_retry_policy(),
        api_timeout: Duration::from_secs(5),
        clone_timeout: Duration::from_secs(5),
        dry_run,
        allow_prerelease: false,
        workspace_root,
    }
}

#[test]
fn config_validation_rejects_duplicate_group_ids() {
    let yaml = r#"
version: 1
groups:
  - id: g1
    source: { repo: "acme/a", branch: "main" }
    targets:
      - repo: "acme/a-mirror"
        files: [{ src: "LICENSE", dest: "LICENSE" }]
  - id: g1
    source: { repo: "acme/b", branch: "main" }
    targets:
      - repo: "acme/b-mirror"
        files: [{ src: "LICENSE", dest: "LICENSE" }]
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn config_validation_accepts_well_formed_multi_group_document() {
    let yaml = r#"
version: 1
branch_prefix: "chore/sync-files"
groups:
  - id: core
    priority: 10
    source: { repo: "acme/toolkit", branch: "main" }
    targets:
      - repo: "acme/widgets"
        files: [{ src: "LICENSE", dest: "LICENSE" }]
  - id: extras
    priority: 20
    depends_on: ["core"]
    source: { repo: "acme/toolkit", branch: "main" }
    targets:
      - repo: "acme/gadgets"
        directories:
          - { src: "ci/", dest: ".github/workflows/" }
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert!(config.validate().is_ok());
    let groups = config.into_groups();
    assert_eq!(groups.len(), 2);
    let schedule = Schedule::build(&groups).unwrap();
    assert_eq!(schedule.order, vec!["core", "extras"]);
}

#[tokio::test]
async fn up_to_date_target_makes_no_remote_mutating_calls() {
    let source_repo = "acme/toolkit";
    let target_repo = "acme/widgets";
    let source_sha = fake_sha("cafef00dcafe");

    let host = FakeHostApi::new();
    host.set_branch(source_repo, "main", &source_sha);
    let sync_branch = syncforge::branch::format(BRANCH_PREFIX, chrono::Utc::now(), &source_sha);
    host.set_branch(target_repo, &sync_branch, "irrelevant");

    let git = FakeGitClient::new();
    let resolver = Resolver::new(Duration::from_secs(60));
    let cancellation = CancellationContext::default();
    let workspace = tempfile::tempdir().unwrap();

    let group = basic_group(
        "default",
        100,
        &[],
        source_repo,
        vec![file_target(target_repo, "LICENSE", "LICENSE")],
    );

    let ctx = run_context(&host, &git, &resolver, &cancellation, workspace.path().to_path_buf(), false);
    let summary = orchestrator::run(&ctx, &[group], BRANCH_PREFIX).await.unwrap();

    assert_eq!(summary.groups.len(), 1);
    assert_eq!(summary.groups[0].targets.len(), 1);
    assert_eq!(summary.groups[0].targets[0].outcome, TargetOutcome::UpToDate);
    assert_eq!(git.clone_call_count(), 0, "an up-to-date target must never be cloned");
    assert_eq!(host.created_pr_count(), 0);
}

#[tokio::test]
async fn behind_target_dry_run_reports_succeeded_without_mutating_anything() {
    let source_repo = "acme/toolkit";
    let target_repo = "acme/widgets";
    let source_sha = fake_sha("deadbeefcafe");

    let host = FakeHostApi::new();
    host.set_branch(source_repo, "main", &source_sha);
    // no sync branches recorded for the target: it's freshly "behind"

    let git = FakeGitClient::new();
    git.seed_tree(&clone_url(source_repo), "main", &[("LICENSE", b"MIT license text")]);

    let resolver = Resolver::new(Duration::from_secs(60));
    let cancellation = CancellationContext::default();
    let workspace = tempfile::tempdir().unwrap();

    let group = basic_group(
        "default",
        100,
        &[],
        source_repo,
        vec![file_target(target_repo, "LICENSE", "LICENSE")],
    );

    let ctx = run_context(&host, &git, &resolver, &cancellation, workspace.path().to_path_buf(), true);
    let summary = orchestrator::run(&ctx, &[group], BRANCH_PREFIX).await.unwrap();

    match &summary.groups[0].targets[0].outcome {
        TargetOutcome::Succeeded { pr_url, files_changed } => {
            assert!(pr_url.is_none(), "dry run must never open a PR");
            assert_eq!(files_changed, &["LICENSE".to_string()]);
        }
        other => panic!("expected Succeeded, got {other:?}"),
    }
    assert_eq!(host.created_pr_count(), 0);
    assert_eq!(git.push_attempt_count(), 0, "dry run must never push");
    assert_eq!(git.clone_call_count(), 1, "dry run only clones the source, never the target");
}

#[tokio::test]
async fn protected_branch_push_rejection_still_results_in_an_open_pr() {
    let source_repo = "acme/toolkit";
    let target_repo = "acme/widgets";
    let source_sha = fake_sha("0123456789ab");

    let host = FakeHostApi::new();
    host.set_branch(source_repo, "main", &source_sha);

    let git = FakeGitClient::new();
    git.seed_tree(&clone_url(source_repo), "main", &[("LICENSE", b"MIT license text")]);
    git.seed_tree(&clone_url(target_repo), "main", &[]);
    git.protect_all_pushes();

    let resolver = Resolver::new(Duration::from_secs(60));
    let cancellation = CancellationContext::default();
    let workspace = tempfile::tempdir().unwrap();

    let group = basic_group(
        "default",
        100,
        &[],
        source_repo,
        vec![file_target(target_repo, "LICENSE", "LICENSE")],
    );

    let ctx = run_context(&host, &git, &resolver, &cancellation, workspace.path().to_path_buf(), false);
    let summary = orchestrator::run(&ctx, &[group], BRANCH_PREFIX).await.unwrap();

    match &summary.groups[0].targets[0].outcome {
        TargetOutcome::Succeeded { pr_url, .. } => assert!(pr_url.is_some()),
        other => panic!("expected Succeeded with a PR, got {other:?}"),
    }
    assert_eq!(git.push_attempt_count(), 1, "the rejected push is attempted exactly once (not retried)");
    assert_eq!(host.created_pr_count(), 1);
}

#[tokio::test]
async fn failing_group_skips_its_dependents_but_not_unrelated_siblings() {
    let host = FakeHostApi::new();
    // "broken" group's source branch is never registered -> discovery fails.
    host.set_branch("acme/standalone-source", "main", &fake_sha("standalone01"));

    let git = FakeGitClient::new();
    let resolver = Resolver::new(Duration::from_secs(60));
    let cancellation = CancellationContext::default();
    let workspace = tempfile::tempdir().unwrap();

    let broken = basic_group("broken", 10, &[], "acme/missing-source", vec![]);
    let dependent = basic_group("dependent", 20, &["broken"], "acme/standalone-source", vec![]);
    let standalone = basic_group("standalone", 30, &[], "acme/standalone-source", vec![]);

    let ctx = run_context(&host, &git, &resolver, &cancellation, workspace.path().to_path_buf(), false);
    let summary = orchestrator::run(&ctx, &[broken, dependent, standalone], BRANCH_PREFIX).await.unwrap();

    let status = |id: &str| {
        summary
            .groups
            .iter()
            .find(|g| g.group_id == id)
            .unwrap_or_else(|| panic!("missing group {id} in summary"))
            .status
            .clone()
    };

    assert_eq!(status("broken"), syncforge::model::GroupStatus::Failed);
    assert_eq!(status("dependent"), syncforge::model::GroupStatus::Skipped);
    assert_eq!(status("standalone"), syncforge::model::GroupStatus::Succeeded);
}

#[tokio::test]
async fn exclude_set_skips_a_group_while_its_dependents_still_run() {
    let host = FakeHostApi::new();
    host.set_branch("acme/standalone-source", "main", &fake_sha("standalone01"));

    let git = FakeGitClient::new();
    let resolver = Resolver::new(Duration::from_secs(60));
    let cancellation = CancellationContext::default();
    let workspace = tempfile::tempdir().unwrap();

    let excluded = basic_group("excluded", 10, &[], "acme/standalone-source", vec![]);
    let dependent = basic_group("dependent", 20, &["excluded"], "acme/standalone-source", vec![]);

    let ctx = run_context(&host, &git, &resolver, &cancellation, workspace.path().to_path_buf(), false);
    let filter = orchestrator::GroupFilter {
        include: Default::default(),
        exclude: ["excluded".to_string()].into_iter().collect(),
    };
    let summary = orchestrator::run_filtered(&ctx, &[excluded, dependent], BRANCH_PREFIX, &filter)
        .await
        .unwrap();

    let status = |id: &str| {
        summary
            .groups
            .iter()
            .find(|g| g.group_id == id)
            .unwrap_or_else(|| panic!("missing group {id} in summary"))
            .status
            .clone()
    };
    assert_eq!(status("excluded"), syncforge::model::GroupStatus::Disabled);
    assert_eq!(status("dependent"), syncforge::model::GroupStatus::Succeeded);
}

#[tokio::test]
async fn include_set_runs_only_the_named_group() {
    let host = FakeHostApi::new();
    host.set_branch("acme/source-a", "main", &fake_sha("sourcea00000"));
    host.set_branch("acme/source-b", "main", &fake_sha("sourceb00000"));

    let git = FakeGitClient::new();
    let resolver = Resolver::new(Duration::from_secs(60));
    let cancellation = CancellationContext::default();
    let workspace = tempfile::tempdir().unwrap();

    let a = basic_group("a", 10, &[], "acme/source-a", vec![]);
    let b = basic_group("b", 20, &[], "acme/source-b", vec![]);

    let ctx = run_context(&host, &git, &resolver, &cancellation, workspace.path().to_path_buf(), false);
    let filter = orchestrator::GroupFilter {
        include: ["a".to_string()].into_iter().collect(),
        exclude: Default::default(),
    };
    let summary = orchestrator::run_filtered(&ctx, &[a, b], BRANCH_PREFIX, &filter).await.unwrap();

    let status = |id: &str| {
        summary
            .groups
            .iter()
            .find(|g| g.group_id == id)
            .unwrap_or_else(|| panic!("missing group {id} in summary"))
            .status
            .clone()
    };
    assert_eq!(status("a"), syncforge::model::GroupStatus::Succeeded);
    assert_eq!(status("b"), syncforge::model::GroupStatus::Disabled);
}

#[test]
fn schedule_detects_a_cycle_and_names_every_member() {
    let groups = vec![
        basic_group("a", 100, &["b"], "acme/a", vec![]),
        basic_group("b", 100, &["c"], "acme/b", vec![]),
        basic_group("c", 100, &["a"], "acme/c", vec![]),
    ];
    let err = Schedule::build(&groups).unwrap_err();
    match err {
        syncforge::error::SyncError::Validation(msg) => {
            assert!(msg.contains('a') && msg.contains('b') && msg.contains('c'));
        }
        other => panic!("expected a validation error naming the cycle, got {other:?}"),
    }
}
