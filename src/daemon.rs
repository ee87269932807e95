//! Daemon mode: runs the orchestrator on a fixed interval in the
//! background, with PID-file management and graceful shutdown.
//!
//! Uses the `daemonize`-based background fork, a PID-file read/write/cleanup
//! dance, `nix`'s `SIGTERM` delivery for `stop`, and a `tokio::sync::broadcast`
//! shutdown signal. The periodic body calls `orchestrator::run` against the
//! configured groups.

use crate::config::Config;
use crate::model::SyncSummary;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Parses duration strings like `30s`, `15m`, `1h`, `2d`. A bare number is
/// read as seconds.
fn parse_daemon_duration(duration_str: &str) -> Result<u64> {
    let duration_str = duration_str.trim().to_lowercase();

    if let Some(value) = duration_str.strip_suffix('s') {
        value.parse::<u64>().context("invalid seconds value")
    } else if let Some(value) = duration_str.strip_suffix('m') {
        value.parse::<u64>().map(|v| v * 60).context("invalid minutes value")
    } else if let Some(value) = duration_str.strip_suffix('h') {
        value.parse::<u64>().map(|v| v * 3600).context("invalid hours value")
    } else if let Some(value) = duration_str.strip_suffix('d') {
        value.parse::<u64>().map(|v| v * 86400).context("invalid days value")
    } else {
        duration_str.parse::<u64>().context("invalid duration format, use e.g. '30m', '1h', '2d'")
    }
}

pub struct Daemon {
    config: Arc<Config>,
    shutdown_sender: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
    pid_file_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub is_running: bool,
    pub uptime: Duration,
    pub last_sync: Option<Instant>,
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub next_sync_in: Option<Duration>,
}

impl Daemon {
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let (shutdown_sender, _) = broadcast::channel(1);
        let is_running = Arc::new(AtomicBool::new(false));

        let pid_file_path = if !config.daemon.pid_file.is_empty() {
            let expanded = shellexpand::full(&config.daemon.pid_file).context("failed to expand PID file path")?;
            Some(PathBuf::from(expanded.as_ref()))
        } else {
            None
        };

        Ok(Self {
            config,
            shutdown_sender,
            is_running,
            pid_file_path,
        })
    }

    /// Runs the daemon loop in the foreground until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        info!("starting syncforge daemon");

        self.write_pid_file().context("failed to write PID file")?;
        self.is_running.store(true, Ordering::SeqCst);

        let shutdown_receiver = self.shutdown_sender.subscribe();
        let is_running = self.is_running.clone();
        let shutdown_sender = self.shutdown_sender.clone();
        tokio::spawn(async move {
            Self::wait_for_shutdown_signal().await;
            info!("shutdown signal received, stopping daemon");
            is_running.store(false, Ordering::SeqCst);
            let _ = shutdown_sender.send(());
        });

        let result = self.daemon_loop(shutdown_receiver).await;
        self.cleanup().context("failed to clean up daemon state")?;
        result
    }

    /// Forks into the background (Unix only) via `daemonize`.
    #[cfg(unix)]
    pub fn daemonize(&self) -> Result<()> {
        use daemonize::Daemonize;

        let log_file = if !self.config.daemon.log_file.is_empty() {
            let expanded = shellexpand::full(&self.config.daemon.log_file).context("failed to expand log file path")?;
            Some(std::fs::File::create(expanded.as_ref()).context("failed to create log file")?)
        } else {
            None
        };

        let mut daemonize = Daemonize::new();
        if let Some(pid_path) = &self.pid_file_path {
            daemonize = daemonize.pid_file(pid_path);
        }
        if let Some(log_file) = log_file {
            daemonize = daemonize.stdout(log_file.try_clone().context("failed to clone log file handle")?).stderr(log_file);
        }

        daemonize.start().context("failed to daemonize process")?;
        info!("syncforge daemon started as a background service");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("sending shutdown signal to daemon");

        let Some(pid_file) = &self.pid_file_path else {
            warn!("no PID file configured, cannot stop daemon");
            return Ok(());
        };
        if !pid_file.exists() {
            warn!("PID file not found, daemon may not be running");
            return Ok(());
        }

        let pid_str = fs::read_to_string(pid_file).context("failed to read PID file")?;
        let pid: u32 = pid_str.trim().parse().context("invalid PID in PID file")?;

        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;
            signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).context("failed to send SIGTERM to daemon process")?;
        }
        #[cfg(not(unix))]
        {
            warn!("daemon stop is not implemented on this platform");
        }

        info!(pid, "shutdown signal sent");
        Ok(())
    }

    pub fn status(&self, start_time: Instant) -> DaemonStatus {
        let is_running = self.is_running.load(Ordering::SeqCst);
        let uptime = start_time.elapsed();
        let next_sync_in = is_running.then(|| {
            let interval_secs = parse_daemon_duration(&self.config.daemon.interval).unwrap_or(3600);
            Duration::from_secs(interval_secs)
        });

        DaemonStatus {
            is_running,
            uptime,
            last_sync: None,
            total_syncs: 0,
            successful_syncs: 0,
            failed_syncs: 0,
            next_sync_in,
        }
    }

    async fn daemon_loop(&self, mut shutdown_receiver: broadcast::Receiver<()>) -> Result<()> {
        let sync_interval_secs = parse_daemon_duration(&self.config.daemon.interval).context("failed to parse daemon interval")?;
        let mut interval_timer = interval(Duration::from_secs(sync_interval_secs));
        info!(interval_secs = sync_interval_secs, "daemon loop started");

        interval_timer.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_receiver.recv() => {
                    info!("shutdown signal received in daemon loop");
                    break;
                }
                _ = interval_timer.tick() => {
                    if !self.is_running.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!("starting scheduled sync run");
                    let sync_start = Instant::now();
                    match crate::run_from_config(&self.config).await {
                        Ok(summary) => self.log_sync_success(&summary, sync_start.elapsed()),
                        Err(e) => self.log_sync_failure(&e),
                    }
                }
            }
        }

        info!("daemon loop exiting");
        Ok(())
    }

    async fn wait_for_shutdown_signal() {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
        debug!("ctrl-c received");
    }

    fn write_pid_file(&self) -> Result<()> {
        let Some(pid_file) = &self.pid_file_path else { return Ok(()) };
        if let Some(parent) = pid_file.parent() {
            fs::create_dir_all(parent).context("failed to create PID file directory")?;
        }
        fs::write(pid_file, std::process::id().to_string()).context("failed to write PID file")?;
        info!(pid_file = %pid_file.display(), "PID file written");
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                fs::remove_file(pid_file).context("failed to remove PID file")?;
                info!(pid_file = %pid_file.display(), "PID file removed");
            }
        }
        self.is_running.store(false, Ordering::SeqCst);
        info!("daemon cleanup complete");
        Ok(())
    }

    fn log_sync_success(&self, summary: &SyncSummary, duration: Duration) {
        let total: usize = summary.groups.iter().map(|g| g.targets.len()).sum();
        let failed: usize = summary.groups.iter().map(|g| g.failed_target_count()).sum();
        info!(
            duration_secs = duration.as_secs_f64(),
            total, failed,
            "scheduled sync run completed",
        );
    }

    fn log_sync_failure(&self, error: &anyhow::Error) {
        error!(error = ?error, "scheduled sync run failed");
    }
}

pub fn is_daemon_running(config: &Config) -> Result<bool> {
    if config.daemon.pid_file.is_empty() {
        return Ok(false);
    }
    let expanded = shellexpand::full(&config.daemon.pid_file).context("failed to expand PID file path")?;
    let pid_file = PathBuf::from(expanded.as_ref());
    if !pid_file.exists() {
        return Ok(false);
    }

    let pid_str = fs::read_to_string(&pid_file).context("failed to read PID file")?;
    let pid: u32 = match pid_str.trim().parse() {
        Ok(p) => p,
        Err(_) => return Ok(false),
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        Ok(kill(Pid::from_raw(pid as i32), None).is_ok())
    }
    #[cfg(not(unix))]
    {
        Ok(true)
    }
}
