//! Deadline enforcement for worker runs.

use isoflow_core::FlowError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Turns "the run took too long" into [`FlowError::Timeout`].
///
/// Expiry only stops the wait: the raced future is dropped, nothing is sent
/// to the worker, and nothing is retried. Reclaiming a runaway sandbox is
/// left to the runner's `unload`.
#[derive(Debug, Clone, Default)]
pub struct DeadlineScheduler {
    expirations: Arc<AtomicU64>,
}

impl DeadlineScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run_with_deadline<F>(
        &self,
        deadline: Duration,
        fut: F,
    ) -> Result<F::Output, FlowError>
    where
        F: Future,
    {
        match tokio::time::timeout(deadline, fut).await {
            Ok(output) => Ok(output),
            Err(_) => {
                self.expirations.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(deadline_ms = deadline.as_millis() as u64, "deadline elapsed");
                Err(FlowError::Timeout { deadline })
            }
        }
    }

    /// Number of deadlines that elapsed so far.
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }
}
