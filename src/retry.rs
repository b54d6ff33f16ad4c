//! Bounded retries for transient conditions.
//!
//! Scheduler submits and polls can fail transiently (broken pipes, full
//! filesystems, workload-manager requeues). Those are retried with
//! exponential backoff up to a configured limit; anything classified
//! non-transient propagates immediately.

use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

/// Backoff schedule: `base · 2^attempt`, capped.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of re-attempts after the first try
    pub limit: u32,
    /// First backoff interval
    pub base: Duration,
    /// Backoff ceiling
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 3,
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy with the default 2 s base and 60 s cap.
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// The delay before re-attempt number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Run `op`, retrying while `is_transient` says so and attempts
    /// remain. The final error is returned unchanged.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        is_transient: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.limit && is_transient(&e) => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        %e,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs(),
                        "{what} failed transiently, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Whether an I/O error is worth retrying.
pub fn transient_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::StorageFull
            | ErrorKind::ResourceBusy
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(0), Duration::from_secs(2));
        assert_eq!(p.backoff(1), Duration::from_secs(4));
        assert_eq!(p.backoff(4), Duration::from_secs(32));
        assert_eq!(p.backoff(5), Duration::from_secs(60));
        assert_eq!(p.backoff(20), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_to_success() {
        let p = RetryPolicy::with_limit(5);
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = p
            .run("submit", |_| true, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("requeued".to_string())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_error() {
        let p = RetryPolicy::with_limit(2);
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = p
            .run("submit", |_| true, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("still broken".to_string())
            })
            .await;
        assert_eq!(result.unwrap_err(), "still broken");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_do_not_retry() {
        let p = RetryPolicy::with_limit(5);
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = p
            .run("submit", |_| false, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("bad request".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
