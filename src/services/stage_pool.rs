//! Bounded, time-boxed execution of pipeline stages.
//!
//! Stages are synchronous closures run on the blocking thread pool. A
//! semaphore bounds how many run at once and every run is wrapped in a
//! deadline. A stage that misses its deadline keeps running to completion
//! but its output is discarded; it holds its permit until it finishes, so
//! the orchestrator builds one pool per request.

use crate::Error;
use crate::observability::{RequestContext, current_request_id, enter_request_context};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::sync::Semaphore;
use tracing::Instrument;

/// Why a stage produced no result.
#[derive(Debug, ThisError)]
pub enum StageError {
    /// The stage missed its deadline.
    #[error("stage '{stage}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Stage name.
        stage: &'static str,
        /// The deadline.
        timeout_ms: u64,
    },

    /// The stage returned an error.
    #[error("stage '{stage}' failed: {source}")]
    Failed {
        /// Stage name.
        stage: &'static str,
        /// The stage's error.
        #[source]
        source: Error,
    },

    /// The stage panicked or was cancelled by the runtime.
    #[error("stage '{stage}' aborted: {cause}")]
    Aborted {
        /// Stage name.
        stage: &'static str,
        /// Join error description.
        cause: String,
    },

    /// The pool was shut down before a permit was granted.
    #[error("stage '{stage}' rejected: pool closed")]
    Rejected {
        /// Stage name.
        stage: &'static str,
    },
}

impl StageError {
    /// Returns the name of the stage that failed.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Timeout { stage, .. }
            | Self::Failed { stage, .. }
            | Self::Aborted { stage, .. }
            | Self::Rejected { stage } => stage,
        }
    }

    /// Returns a short label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Failed { .. } => "failed",
            Self::Aborted { .. } => "aborted",
            Self::Rejected { .. } => "rejected",
        }
    }
}

impl From<StageError> for Error {
    fn from(err: StageError) -> Self {
        match err {
            StageError::Timeout { stage, timeout_ms } => Self::StageTimeout {
                stage: stage.to_string(),
                timeout_ms,
            },
            StageError::Failed { source, .. } => source,
            other => Self::OperationFailed {
                operation: other.stage().to_string(),
                cause: other.to_string(),
            },
        }
    }
}

/// Semaphore-bounded pool for stage closures.
#[derive(Debug, Clone)]
pub struct StagePool {
    semaphore: Arc<Semaphore>,
    timeout: Duration,
}

impl StagePool {
    /// Creates a pool with `max_concurrent` permits (minimum 1) and a
    /// per-stage deadline.
    #[must_use]
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    /// Returns the number of idle permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Returns the per-stage deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `work` on the blocking pool under a permit and the deadline.
    ///
    /// Waiting for a permit counts against the deadline. The caller's span
    /// and request id are carried onto the blocking thread.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] when the stage times out, fails, panics, or
    /// the pool is closed.
    pub async fn run<T, F>(&self, stage: &'static str, work: F) -> Result<T, StageError>
    where
        T: Send + 'static,
        F: FnOnce() -> crate::Result<T> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let attempt = async move {
            let permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| StageError::Rejected { stage })?;
            run_blocking(stage, move || {
                let _permit = permit;
                work()
            })
            .await
        };

        tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| StageError::Timeout {
                stage,
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }
}

/// Runs `work` on the blocking pool with no permit and no deadline.
///
/// The caller's span and request id are carried onto the blocking thread.
///
/// # Errors
///
/// Returns [`StageError::Failed`] when `work` fails and
/// [`StageError::Aborted`] when it panics.
pub async fn run_blocking<T, F>(stage: &'static str, work: F) -> Result<T, StageError>
where
    T: Send + 'static,
    F: FnOnce() -> crate::Result<T> + Send + 'static,
{
    let span = tracing::debug_span!("stage", stage);
    let request_id = current_request_id();

    let blocking_span = span.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let _span = blocking_span.enter();
        let _context = request_id.map(|id| enter_request_context(RequestContext::from_id(id)));
        work()
    });

    handle
        .instrument(span)
        .await
        .map_err(|e| StageError::Aborted {
            stage,
            cause: e.to_string(),
        })?
        .map_err(|source| StageError::Failed { stage, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::scope_request_context;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = StagePool::new(2, Duration::from_secs(1));
        let value = pool.run("answer", || Ok(42)).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_reported_with_stage() {
        let pool = StagePool::new(1, Duration::from_secs(1));
        let err = pool
            .run::<(), _>("memory", || Err(Error::storage("query", "disk gone")))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "memory");
        assert_eq!(err.reason(), "failed");
    }

    #[tokio::test]
    async fn test_timeout_discards_slow_stage() {
        let pool = StagePool::new(1, Duration::from_millis(20));
        let err = pool
            .run("snapshot", || {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Timeout { stage: "snapshot", timeout_ms: 20 }));

        let converted: Error = err.into();
        assert!(matches!(converted, Error::StageTimeout { .. }));
    }

    #[tokio::test]
    async fn test_panic_is_aborted() {
        let pool = StagePool::new(1, Duration::from_secs(1));
        let err = pool
            .run::<(), _>("boom", || panic!("stage blew up"))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "aborted");
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_stage_keeps_its_permit() {
        let pool = StagePool::new(1, Duration::from_millis(20));
        let err = pool
            .run("snapshot", || {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "timeout");
        assert_eq!(pool.available_permits(), 0);

        let fresh = StagePool::new(1, Duration::from_millis(20));
        assert_eq!(fresh.run("recall", || Ok(7)).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_run_blocking_reports_failure_and_context() {
        let err = run_blocking::<(), _>("persist", || Err(Error::storage("store", "full")))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "persist");
        assert_eq!(err.reason(), "failed");

        let observed = scope_request_context(RequestContext::from_id("req-9"), async {
            run_blocking("persist", || Ok(current_request_id())).await.unwrap()
        })
        .await;
        assert_eq!(observed.as_deref(), Some("req-9"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let pool = StagePool::new(2, Duration::from_secs(5));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            tasks.spawn(async move {
                pool.run("work", move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_request_id_reaches_blocking_thread() {
        let pool = StagePool::new(1, Duration::from_secs(1));
        let observed = scope_request_context(RequestContext::from_id("req-123"), async {
            pool.run("ctx", || Ok(current_request_id())).await.unwrap()
        })
        .await;
        assert_eq!(observed.as_deref(), Some("req-123"));
    }
}
