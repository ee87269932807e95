//! Resilience layer: retry with exponential backoff and jitter,
//! rate-limit-aware waits, cooperative cancellation, and per-target panic
//! isolation, split into its own module rather than inlined at every call
//! site.

use crate::error::{Result, SyncError};
use futures::FutureExt;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: f64,
    pub jitter: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2.0,
            jitter: 0.20,
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// The un-jittered delay before attempt `attempt` (1-indexed).
    fn base_delay(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.factor.powi(attempt as i32 - 1);
        Duration::from_secs_f64(scaled.min(self.cap.as_secs_f64()))
    }

    /// Applies ±`jitter` fraction of randomness to a delay.
    fn jittered(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        let factor = 1.0 + rng.gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0)).min(self.cap)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.jittered(self.base_delay(attempt))
    }
}

const RATE_LIMIT_MAX_WAIT: Duration = Duration::from_secs(10 * 60);

/// Computes how long to sleep for a rate-limited response carrying
/// `reset_at`, clamped so a misbehaving or clock-skewed response can never
/// stall the run for more than 10 minutes.
fn rate_limit_wait(reset_at: chrono::DateTime<chrono::Utc>) -> Duration {
    let remaining = reset_at - chrono::Utc::now();
    remaining
        .to_std()
        .unwrap_or(Duration::ZERO)
        .min(RATE_LIMIT_MAX_WAIT)
}

/// Shared cancellation + deadline context threaded through every call in a
/// run. Cloning is cheap (just an `Arc`); every clone observes the same
/// cancellation flag and the same overall deadline.
#[derive(Clone)]
pub struct CancellationContext {
    cancelled: Arc<AtomicBool>,
    overall_deadline: Option<Instant>,
}

impl CancellationContext {
    pub fn new(overall_timeout: Option<Duration>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            overall_deadline: overall_timeout.map(|d| Instant::now() + d),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The effective timeout for one operation: `min(remaining overall
    /// deadline, per_call)`, per the Open Questions decision in
    /// SPEC_FULL.md (prefer the shorter of per-target vs. overall).
    pub fn effective_timeout(&self, per_call: Duration) -> Duration {
        match self.overall_deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                remaining.min(per_call)
            }
            None => per_call,
        }
    }
}

impl Default for CancellationContext {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Runs `op` under the retry policy, honoring `ctx`'s cancellation and
/// deadline. `per_call_timeout` bounds each individual attempt.
///
/// Retries only on `SyncError::is_retryable()` errors. A `RateLimited` error
/// whose payload carries reset metadata sleeps until that reset (clamped to
/// 10 minutes) instead of the exponential schedule, and does not consume an
/// attempt.
pub async fn with_retry<T, F, Fut>(
    ctx: &CancellationContext,
    policy: &RetryPolicy,
    per_call_timeout: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        ctx.check()?;
        let call_timeout = ctx.effective_timeout(per_call_timeout);
        let result = timeout(call_timeout, op()).await;

        let outcome = match result {
            Ok(inner) => inner,
            Err(_) => Err(SyncError::Transient("operation timed out".into())),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(SyncError::RateLimited { message, reset_at: Some(reset_at) }) => {
                let wait = rate_limit_wait(reset_at);
                tracing::warn!(?wait, %message, "rate limited, sleeping until reset");
                tokio::time::sleep(wait).await;
                // the reset wait is not an attempt; the counter does not advance
            }
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(attempt, ?delay, error = %err, "retrying after transient error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Runs `fut` and converts a panic into `SyncError::Panic`, isolating the
/// per-target task boundary so one target's panic never takes down a run.
///
/// Uses `catch_unwind` rather than `tokio::spawn` so the caller can pass a
/// future borrowing from the run's shared adapters (`&dyn HostApi` etc.)
/// without needing them to be `'static`; the orchestrator's per-target
/// futures live only as long as one `FuturesUnordered` poll loop, never
/// escaping to a separately spawned task.
pub async fn isolate<T, Fut>(fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
        Ok(inner) => inner,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic in target task".to_string());
            Err(SyncError::Panic(msg))
        }
    }
}
