//! Preflight health checks ("doctor"), run before a sync or daemon start to
//! surface misconfiguration early rather than mid-run.
//!
//! Checks git-on-PATH, GitHub auth, host-API reachability (this domain only
//! ever talks to the host API and HTTPS remotes, never SSH), and workspace
//! root writability.

use crate::config::Config;
use crate::github::{GitHubClient, HostApi};
use tokio::process::Command;

/// Result of every preflight check.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub git: CheckResult,
    pub github_auth: CheckResult,
    pub workspace_root: CheckResult,
    pub host_api: CheckResult,
}

/// Result of an individual check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self { passed: true, message: message.into(), details: None, is_warning: false }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self { passed: true, message: message.into(), details: Some(details.into()), is_warning: false }
    }

    fn error(message: impl Into<String>) -> Self {
        Self { passed: false, message: message.into(), details: None, is_warning: false }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self { passed: false, message: message.into(), details: Some(details.into()), is_warning: false }
    }

    #[allow(dead_code)]
    fn warning(message: impl Into<String>) -> Self {
        Self { passed: true, message: message.into(), details: None, is_warning: true }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self { passed: true, message: message.into(), details: Some(details.into()), is_warning: true }
    }
}

impl HealthCheck {
    /// Runs every check. Individual checks never panic or short-circuit one
    /// another — a failed git check doesn't prevent the auth check from
    /// running.
    pub async fn run(config: &Config) -> Self {
        Self {
            git: check_git().await,
            github_auth: check_github_auth(config).await,
            workspace_root: check_workspace_root(config),
            host_api: check_host_api(config).await,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.all_checks().iter().all(|c| c.passed)
    }

    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks().into_iter().filter(|c| !c.passed).collect()
    }

    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks().into_iter().filter(|c| c.passed && c.is_warning).collect()
    }

    pub fn all_checks(&self) -> Vec<&CheckResult> {
        vec![&self.git, &self.github_auth, &self.workspace_root, &self.host_api]
    }
}

async fn check_git() -> CheckResult {
    match Command::new("git").arg("--version").output().await {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            CheckResult::ok_with_details("git is installed", version)
        }
        Ok(output) => {
            CheckResult::error_with_details("git exited with an error", String::from_utf8_lossy(&output.stderr).to_string())
        }
        Err(e) => CheckResult::error_with_details("git is not on PATH", e.to_string()),
    }
}

async fn check_github_auth(config: &Config) -> CheckResult {
    match GitHubClient::new(&config.auth.method).await {
        Ok(client) => CheckResult::ok_with_details("GitHub authentication resolved", format!("authenticated as {}", client.username())),
        Err(e) => CheckResult::error_with_details("GitHub authentication failed", e.to_string()),
    }
}

fn check_workspace_root(config: &Config) -> CheckResult {
    let root = config.workspace_root();
    match std::fs::create_dir_all(&root) {
        Ok(()) => {
            let probe = root.join(".syncforge-write-test");
            match std::fs::write(&probe, b"ok") {
                Ok(()) => {
                    let _ = std::fs::remove_file(&probe);
                    CheckResult::ok_with_details("workspace root is writable", root.display().to_string())
                }
                Err(e) => CheckResult::error_with_details("workspace root is not writable", e.to_string()),
            }
        }
        Err(e) => CheckResult::error_with_details("failed to create workspace root", e.to_string()),
    }
}

async fn check_host_api(config: &Config) -> CheckResult {
    let client = match GitHubClient::new(&config.auth.method).await {
        Ok(c) => c,
        Err(e) => return CheckResult::error_with_details("host API unreachable (auth failed first)", e.to_string()),
    };
    match client.current_user().await {
        Ok(user) => CheckResult::ok_with_details("host API reachable", format!("rate limit headers readable, user: {}", user.login)),
        Err(e) if matches!(e.kind(), crate::error::ErrorKind::RateLimited) => {
            CheckResult::warning_with_details("host API reachable but rate limited", e.to_string())
        }
        Err(e) => CheckResult::error_with_details("host API call failed", e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_result_constructors_set_flags_correctly() {
        let ok = CheckResult::ok("fine");
        assert!(ok.passed && !ok.is_warning);

        let warn = CheckResult::warning_with_details("careful", "detail");
        assert!(warn.passed && warn.is_warning);

        let err = CheckResult::error("broken");
        assert!(!err.passed && !err.is_warning);
    }

    #[tokio::test]
    async fn git_check_reports_installed_version_or_error() {
        let result = check_git().await;
        assert!(result.details.is_some() || !result.passed);
    }
}
