use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Instant;
use syncforge::config::Config;
use syncforge::{daemon, health, model};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "syncforge")]
#[command(about = "Propagates files and directories from a source repo to target repos as pull requests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to the XDG config location)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync pass across every configured group
    Sync {
        /// Perform a dry run without pushing or opening pull requests
        #[arg(long)]
        dry_run: bool,

        /// Run only these group names/ids (comma-separated); may be repeated
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Skip these group names/ids (comma-separated); may be repeated
        #[arg(long, value_delimiter = ',')]
        skip: Vec<String>,
    },

    /// Validate the configuration file without syncing anything
    Validate,

    /// Show per-target sync status without performing any sync
    Status,

    /// Run preflight health checks
    Doctor,

    /// Run in the background on a fixed interval
    Daemon {
        #[command(subcommand)]
        daemon_command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon
    Start {
        /// Stay attached to the terminal instead of forking to the background
        #[arg(long)]
        foreground: bool,
    },
    /// Stop a running daemon
    Stop,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    info!("syncforge v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Sync { dry_run, only, skip } => cmd_sync(dry_run, only, skip, config).await,
        Commands::Validate => cmd_validate(&config),
        Commands::Status => cmd_status(&config).await,
        Commands::Doctor => cmd_doctor(&config).await,
        Commands::Daemon { daemon_command } => cmd_daemon(daemon_command, config).await,
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    Ok(())
}

fn load_config(config_path: Option<&std::path::Path>) -> Result<Config> {
    Config::load_or_default(config_path)
}

async fn cmd_sync(dry_run: bool, only: Vec<String>, skip: Vec<String>, mut config: Config) -> Result<()> {
    if dry_run {
        config.dry_run = true;
    }
    if config.dry_run {
        println!("dry run: no branches will be pushed and no pull requests opened");
    }

    let filter = syncforge::orchestrator::GroupFilter {
        include: only.into_iter().collect(),
        exclude: skip.into_iter().collect(),
    };
    let summary = syncforge::run_from_config_filtered(&config, &filter)
        .await
        .context("sync run failed")?;
    print_summary(&summary);

    if !summary.overall_succeeded() {
        anyhow::bail!("one or more targets failed");
    }
    Ok(())
}

fn print_summary(summary: &model::SyncSummary) {
    for group in &summary.groups {
        println!("group {} [{:?}]:", group.group_id, group.status);
        for target in &group.targets {
            match &target.outcome {
                model::TargetOutcome::Succeeded { pr_url, files_changed } => {
                    let pr = pr_url.as_deref().unwrap_or("(dry run)");
                    println!("  {} -> synced ({} file(s)), {}", target.repo, files_changed.len(), pr);
                }
                model::TargetOutcome::UpToDate => println!("  {} -> up to date", target.repo),
                model::TargetOutcome::Failed { reason } => println!("  {} -> FAILED: {}", target.repo, reason),
                model::TargetOutcome::Skipped { reason } => println!("  {} -> skipped: {}", target.repo, reason),
            }
        }
    }
}

fn cmd_validate(config: &Config) -> Result<()> {
    config.validate().map_err(|e| anyhow::anyhow!(e))?;
    println!("configuration is valid ({} group(s))", config.clone().into_groups().len());
    Ok(())
}

async fn cmd_status(config: &Config) -> Result<()> {
    let host = syncforge::GitHubClient::new(&config.auth.method).await.context("failed to authenticate")?;
    for group in config.clone().into_groups() {
        let source_repo = syncforge::model::RepoRef::parse(&group.source.repo)
            .ok_or_else(|| anyhow::anyhow!("malformed source repo: {}", group.source.repo))?;
        let source_spec = syncforge::model::SourceSpec { repo: source_repo, branch: group.source.branch.clone() };
        let targets: Vec<_> = group
            .targets
            .iter()
            .filter_map(|t| syncforge::model::RepoRef::parse(&t.repo))
            .collect();
        let state = syncforge::discovery::discover(&host, &source_spec, &targets, &config.branch_prefix).await?;

        println!("group {}:", group.id);
        for target in &targets {
            let status = state
                .targets
                .get(&target.full_name())
                .map(|t| format!("{:?}", t.status))
                .unwrap_or_else(|| "unknown".to_string());
            println!("  {} -> {}", target, status);
        }
    }
    Ok(())
}

async fn cmd_doctor(config: &Config) -> Result<()> {
    println!("syncforge preflight checks");
    println!();

    let report = health::HealthCheck::run(config).await;
    for check in report.all_checks() {
        let marker = if check.passed && !check.is_warning {
            "ok"
        } else if check.passed {
            "warn"
        } else {
            "fail"
        };
        println!("[{marker}] {}", check.message);
        if let Some(details) = &check.details {
            println!("       {details}");
        }
    }

    println!();
    if report.all_passed() {
        println!("all checks passed");
        Ok(())
    } else {
        anyhow::bail!("{} check(s) failed", report.errors().len());
    }
}

async fn cmd_daemon(daemon_command: DaemonCommands, config: Config) -> Result<()> {
    match daemon_command {
        DaemonCommands::Start { foreground } => {
            let mut d = daemon::Daemon::new(config)?;
            if !foreground {
                #[cfg(unix)]
                d.daemonize()?;
                #[cfg(not(unix))]
                println!("background forking is only supported on unix, running in foreground");
            }
            d.run().await
        }
        DaemonCommands::Stop => {
            let d = daemon::Daemon::new(config)?;
            d.stop().await
        }
        DaemonCommands::Status => {
            let running = daemon::is_daemon_running(&config)?;
            println!("daemon running: {running}");
            Ok(())
        }
    }
}
