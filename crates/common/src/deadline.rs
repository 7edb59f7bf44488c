//! Time-bounded and cancellable async steps.
//!
//! Every suspension point in the pipeline (fetch, staging, engine load,
//! engine execution, frame decode) goes through [`within`] so a stuck step
//! turns into a named [`ClipweaveError::Timeout`], and through
//! [`CancellationFlag::guard`] so callers can abort between steps.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::{ClipweaveError, ClipweaveResult};

/// Run `fut` with a time budget, naming the step in the timeout error.
pub async fn within<T, F>(step: &str, budget: Duration, fut: F) -> ClipweaveResult<T>
where
    F: Future<Output = ClipweaveResult<T>>,
{
    let started = Instant::now();
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => {
            tracing::trace!(step, elapsed_ms = started.elapsed().as_millis() as u64, "Step finished");
            result
        }
        Err(_) => {
            tracing::warn!(step, budget_ms = budget.as_millis() as u64, "Step timed out");
            Err(ClipweaveError::timeout(step, budget))
        }
    }
}

/// Shared cancellation signal.
///
/// Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fail fast if cancellation was already requested.
    pub fn check(&self) -> ClipweaveResult<()> {
        if self.is_cancelled() {
            Err(ClipweaveError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Run `fut`, abandoning it with `Cancelled` if the flag trips first.
    pub async fn guard<T, F>(&self, fut: F) -> ClipweaveResult<T>
    where
        F: Future<Output = ClipweaveResult<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ClipweaveError::Cancelled),
            result = fut => result,
        }
    }
}
