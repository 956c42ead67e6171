use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Error;

/// A bounded, cancellable retry loop: fixed interval between attempts and a
/// hard wall-clock ceiling across all attempts. Every polling/retry site
/// (remote directory creation, target provisioning, submission retry) shares
/// this value object instead of open-coding sleep loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_elapsed: Duration) -> Self {
        Self {
            interval,
            max_elapsed,
        }
    }

    /// Runs `attempt` until it succeeds, fails with a non-retryable error,
    /// the elapsed ceiling is reached (the last error is returned), or the
    /// cancellation token fires.
    pub async fn retry<T, F, Fut>(&self, cancel: &CancellationToken, mut attempt: F) -> crate::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let deadline = Instant::now() + self.max_elapsed;
        loop {
            let error = match attempt().await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => error,
            };
            if Instant::now() + self.interval > deadline {
                return Err(error);
            }
            log::debug!("Attempt failed, retrying in {:?}: {error}", self.interval);
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Polls `check` until it reports a value. `Ok(None)` means "not ready
    /// yet"; retryable errors are treated the same way. Exceeding the ceiling
    /// returns `Error::Timeout`.
    pub async fn poll_until<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut check: F,
    ) -> crate::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::Result<Option<T>>>,
    {
        let deadline = Instant::now() + self.max_elapsed;
        loop {
            match check().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(error) if error.is_retryable() => {
                    log::debug!("Poll attempt failed, will retry: {error}");
                }
                Err(error) => return Err(error),
            }
            if Instant::now() + self.interval > deadline {
                return Err(Error::Timeout(self.max_elapsed));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::RetryPolicy;
    use crate::Error;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_transient_failures() {
        let attempts = Cell::new(0);
        let result = policy()
            .retry(&CancellationToken::new(), || {
                attempts.set(attempts.get() + 1);
                let n = attempts.get();
                async move {
                    if n < 3 {
                        Err(Error::Connection("flaky".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_propagates_fatal_errors_immediately() {
        let attempts = Cell::new(0);
        let result: crate::Result<()> = policy()
            .retry(&CancellationToken::new(), || {
                attempts.set(attempts.get() + 1);
                async { Err(Error::Credential("bad key".into())) }
            })
            .await;
        assert!(matches!(result, Err(Error::Credential(_))));
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_ceiling() {
        let result: crate::Result<()> = policy()
            .retry(&CancellationToken::new(), || async {
                Err(Error::Connection("down".into()))
            })
            .await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: crate::Result<()> = policy()
            .retry(&cancel, || async { Err(Error::Connection("down".into())) })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_returns_value_when_ready() {
        let checks = Cell::new(0);
        let result = policy()
            .poll_until(&CancellationToken::new(), || {
                checks.set(checks.get() + 1);
                let n = checks.get();
                async move { Ok(if n == 3 { Some("ready") } else { None }) }
            })
            .await;
        assert_eq!(result.unwrap(), "ready");
        assert_eq!(checks.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_times_out() {
        let result: crate::Result<()> = policy()
            .poll_until(&CancellationToken::new(), || async { Ok(None) })
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
