//! Configuration schema: a struct-tree with serde defaults, a manual
//! `Default` impl, `load_or_default`, and path expansion, generalized from an
//! org-and-filter schema to the group/target/mapping schema this crate
//! operates on.

use crate::resolver;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_priority() -> i32 {
    100
}
fn default_max_concurrency() -> usize {
    4
}
fn default_branch_prefix() -> String {
    "chore/sync-files".to_string()
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_retry_attempts() -> u32 {
    5
}
fn default_api_timeout_secs() -> u64 {
    30
}
fn default_clone_timeout_secs() -> u64 {
    300
}

/// `{src_path, dest_path}` — copy one file, possibly renaming.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMapping {
    pub src: String,
    pub dest: String,
}

/// A directory mapping tagged with a version constraint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleSpec {
    #[serde(rename = "type")]
    pub module_type: String,
    pub version: String,
}

/// `{src_path, dest_path, exclude_patterns[], module?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryMapping {
    pub src: String,
    pub dest: String,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub module: Option<ModuleSpec>,
}

/// `{rewrite_repo_name, variables}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TransformSpec {
    #[serde(default, alias = "repo_name")]
    pub rewrite_repo_name: bool,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl TransformSpec {
    /// Merges this transform over a group-level default: an empty/false
    /// field here falls back to the default's value, and variable maps are
    /// merged with this transform's entries taking precedence.
    pub fn merged_over(&self, default: &TransformSpec) -> TransformSpec {
        let mut variables = default.variables.clone();
        variables.extend(self.variables.clone());
        TransformSpec {
            rewrite_repo_name: self.rewrite_repo_name || default.rewrite_repo_name,
            variables,
        }
    }
}

/// `{repo, branch}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub repo: String,
    pub branch: String,
}

/// `{repo, files[], directories[], transform}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    pub repo: String,
    #[serde(default = "default_branch_name")]
    pub default_branch: String,
    #[serde(default)]
    pub files: Vec<FileMapping>,
    #[serde(default)]
    pub directories: Vec<DirectoryMapping>,
    #[serde(default)]
    pub transform: TransformSpec,
}

fn default_branch_name() -> String {
    "main".to_string()
}

/// Per-group knobs that aren't part of scheduling (labels, concurrency).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupGlobalConfig {
    #[serde(default)]
    pub pr_labels: Vec<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for GroupGlobalConfig {
    fn default() -> Self {
        Self {
            pr_labels: Vec::new(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// `{id, name, priority, enabled, depends_on[], source, targets[], transform_defaults}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub source: SourceConfig,
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub transform_defaults: TransformSpec,
    #[serde(default)]
    pub global: GroupGlobalConfig,
}

/// Tunables for the resilience layer and the module-resolver cache: cache
/// TTL, retry/timeout knobs that don't belong to any one group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdvancedConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub module_cache_ttl_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,
    #[serde(default = "default_clone_timeout_secs")]
    pub clone_timeout_secs: u64,
    #[serde(default)]
    pub overall_timeout_secs: Option<u64>,
    #[serde(default)]
    pub allow_prerelease: bool,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            module_cache_ttl_secs: default_cache_ttl_secs(),
            retry_max_attempts: default_retry_attempts(),
            api_timeout_secs: default_api_timeout_secs(),
            clone_timeout_secs: default_clone_timeout_secs(),
            overall_timeout_secs: None,
            allow_prerelease: false,
        }
    }
}

/// Logging configuration: level and structured-vs-plain output format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// GitHub authentication method selection (`auto`, `gh-cli`, `token`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthConfig {
    #[serde(default = "default_auth_method")]
    pub method: String,
}

fn default_auth_method() -> String {
    "auto".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: default_auth_method(),
        }
    }
}

fn default_daemon_interval() -> String {
    "1h".to_string()
}

fn default_pid_file() -> String {
    "~/.local/share/syncforge/syncforge.pid".to_string()
}

fn default_daemon_log_file() -> String {
    "~/.local/share/syncforge/syncforge.log".to_string()
}

/// Daemon-mode settings: runs the orchestrator on a fixed timer rather than
/// on demand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_interval")]
    pub interval: String,
    #[serde(default = "default_pid_file")]
    pub pid_file: String,
    #[serde(default = "default_daemon_log_file")]
    pub log_file: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: default_daemon_interval(),
            pid_file: default_pid_file(),
            log_file: default_daemon_log_file(),
        }
    }
}

/// Top-level configuration document.
///
/// Either the single-group shorthand (`source` + `targets` + `defaults` at
/// the top level) or `groups: [...]` is present — never both. `into_groups`
/// normalizes either shape into the list the orchestrator consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub groups: Vec<GroupConfig>,

    // single-group shorthand
    #[serde(default)]
    pub source: Option<SourceConfig>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub defaults: TransformSpec,

    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default)]
    pub workspace_root: Option<String>,
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            groups: Vec::new(),
            source: None,
            targets: Vec::new(),
            defaults: TransformSpec::default(),
            branch_prefix: default_branch_prefix(),
            workspace_root: None,
            dry_run: false,
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
            advanced: AdvancedConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

static BRANCH_PREFIX_CHARSET: &str = r"^[A-Za-z0-9._/-]+$";

impl Config {
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            Some(_) => Ok(Self::default()),
            None => {
                let default_path = Self::default_config_path();
                if default_path.exists() {
                    Self::load(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.expand_paths();
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(self).context("failed to serialize config")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("syncforge")
            .join("config.yml")
    }

    fn expand_paths(&mut self) {
        if let Some(root) = &self.workspace_root {
            self.workspace_root = Some(shellexpand::full(root).map(|c| c.into_owned()).unwrap_or_else(|_| root.clone()));
        }
    }

    pub fn workspace_root(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) => PathBuf::from(root),
            None => std::env::temp_dir().join("syncforge-workspaces"),
        }
    }

    /// Normalizes either config shape into an explicit group list. The
    /// single-group shorthand becomes one implicit group named `"default"`.
    pub fn into_groups(self) -> Vec<GroupConfig> {
        if !self.groups.is_empty() {
            return self.groups;
        }
        match self.source {
            Some(source) => vec![GroupConfig {
                id: "default".to_string(),
                name: "default".to_string(),
                priority: default_priority(),
                enabled: true,
                depends_on: Vec::new(),
                source,
                targets: self.targets,
                transform_defaults: self.defaults,
                global: GroupGlobalConfig::default(),
            }],
            None => Vec::new(),
        }
    }

    /// Structural validation: version, branch-prefix charset, duplicate
    /// group ids, unknown `depends_on` targets, and malformed repo/mapping
    /// entries. DAG acyclicity is enforced separately by
    /// `orchestrator::Schedule::build`, which owns cycle detection.
    pub fn validate(&self) -> std::result::Result<(), crate::error::SyncError> {
        use crate::error::SyncError;

        if self.version != 1 {
            return Err(SyncError::Validation(format!(
                "unsupported config version: {}",
                self.version
            )));
        }

        if !Regex::new(BRANCH_PREFIX_CHARSET).unwrap().is_match(&self.branch_prefix) {
            return Err(SyncError::Validation(format!(
                "branch_prefix contains invalid characters: {}",
                self.branch_prefix
            )));
        }

        let groups: Vec<GroupConfig> = if !self.groups.is_empty() {
            self.groups.clone()
        } else {
            self.clone().into_groups()
        };

        let mut seen_ids = std::collections::HashSet::new();
        for group in &groups {
            if !seen_ids.insert(group.id.clone()) {
                return Err(SyncError::Validation(format!("duplicate group id: {}", group.id)));
            }
        }
        for group in &groups {
            for dep in &group.depends_on {
                if !seen_ids.contains(dep) {
                    return Err(SyncError::Validation(format!(
                        "group '{}' depends_on unknown group '{}'",
                        group.id, dep
                    )));
                }
            }
            if crate::model::RepoRef::parse(&group.source.repo).is_none() {
                return Err(SyncError::Validation(format!(
                    "group '{}' has a malformed source repo: {}",
                    group.id, group.source.repo
                )));
            }
            for target in &group.targets {
                validate_target(target)?;
            }
        }

        Ok(())
    }
}

fn validate_target(target: &TargetConfig) -> std::result::Result<(), crate::error::SyncError> {
    use crate::error::SyncError;

    if crate::model::RepoRef::parse(&target.repo).is_none() {
        return Err(SyncError::Validation(format!(
            "target has a malformed repo: {}",
            target.repo
        )));
    }
    if target.files.is_empty() && target.directories.is_empty() {
        return Err(SyncError::Validation(format!(
            "target '{}' declares no file or directory mappings",
            target.repo
        )));
    }
    for f in &target.files {
        if f.src.is_empty() || f.dest.is_empty() {
            return Err(SyncError::Validation(format!(
                "target '{}' has a file mapping with an empty src/dest",
                target.repo
            )));
        }
    }
    for d in &target.directories {
        if d.src.is_empty() || d.dest.is_empty() {
            return Err(SyncError::Validation(format!(
                "target '{}' has a directory mapping with an empty src/dest",
                target.repo
            )));
        }
        if let Some(module) = &d.module {
            resolver::parse_constraint(&module.version).map_err(|_| {
                SyncError::Validation(format!(
                    "target '{}' module '{}' has an unparseable version constraint: {}",
                    target.repo, module.module_type, module.version
                ))
            })?;
        }
    }
    Ok(())
}
