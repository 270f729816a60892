//! Per-worker attempts: timeout, panic capture, exponential backoff with jitter

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};

use crate::core::config::OrchestratorConfig;

use super::state::StateView;
use super::worker::{Worker, WorkerFailure, WorkerOutput};

/// Retry budget for one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Nominal delays before attempts 2..=max_attempts: base, 2*base, 4*base,
    /// capped at `max_delay`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        // from_millis(2) yields 2, 4, 8 ms; the factor rescales that to base, 2*base, ...
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
        let retries = self.max_attempts.saturating_sub(1) as usize;
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .take(retries)
    }

    /// Longest a worker can take under this policy with a given per-attempt timeout
    pub fn worst_case(&self, timeout: Duration) -> Duration {
        let attempts = timeout.saturating_mul(self.max_attempts);
        self.delays().fold(attempts, |total, d| total.saturating_add(d))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

/// Drive `worker` until it succeeds, fails permanently, or the budget runs out.
///
/// `attempts` is bumped before every attempt so the caller can still read it
/// if this future is dropped at the stage deadline.
pub async fn run_attempts(
    worker: Arc<dyn Worker>,
    view: Arc<StateView>,
    timeout: Duration,
    policy: RetryPolicy,
    attempts: Arc<AtomicU32>,
) -> Result<WorkerOutput, WorkerFailure> {
    let name = worker.name().to_string();
    let strategy = policy.delays().map(jitter);

    RetryIf::spawn(
        strategy,
        || {
            let worker = Arc::clone(&worker);
            let view = Arc::clone(&view);
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                tracing::trace!("{} attempt {}", worker.name(), attempt);
                let guarded = AssertUnwindSafe(worker.run(&view)).catch_unwind();
                match tokio::time::timeout(timeout, guarded).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(panic)) => Err(WorkerFailure::permanent(format!(
                        "worker panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                    Err(_) => Err(WorkerFailure::timeout(timeout)),
                }
            }
        },
        |failure: &WorkerFailure| {
            let retry = failure.is_retryable();
            if retry && attempts.load(Ordering::SeqCst) < policy.max_attempts {
                tracing::warn!("⚠️ {} failed ({}), retrying", name, failure);
            }
            retry
        },
    )
    .await
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
