//! Retry policy for protocol requests.
//!
//! A policy is three independent parts: an attempt budget, a delay function
//! and a retry predicate. The pre-retry callback is supplied by the caller of
//! [`SyncPolicy::execute`] so it can surface progress while backing off.

use crate::error::{SyncError, SyncResult};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default number of attempts per request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Step of the linear backoff.
pub const BACKOFF_STEP: Duration = Duration::from_millis(500);

/// Delay function: attempt number (1-based) to the delay before the next attempt.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Retry predicate.
pub type RetryPredicate = Arc<dyn Fn(&SyncError) -> bool + Send + Sync>;

/// Default delay: 500ms times the number of the attempt that failed.
pub fn linear_backoff(attempt: u32) -> Duration {
    BACKOFF_STEP * attempt
}

/// Default predicate: everything is retryable except a lost session or cancellation.
pub fn is_transient(error: &SyncError) -> bool {
    !matches!(error, SyncError::SessionLost { .. } | SyncError::Cancelled)
}

/// Retry policy applied to every request attempt.
#[derive(Clone)]
pub struct SyncPolicy {
    max_attempts: u32,
    backoff: BackoffFn,
    retryable: RetryPredicate,
}

impl SyncPolicy {
    /// Creates the default policy: 10 attempts, linear 500ms backoff.
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Arc::new(linear_backoff),
            retryable: Arc::new(is_transient),
        }
    }

    /// Creates a policy making a single attempt.
    pub fn no_retry() -> Self {
        Self::new().with_max_attempts(1)
    }

    /// Sets the attempt budget (at least one attempt is always made).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Replaces the delay function.
    pub fn with_backoff(
        mut self,
        backoff: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Replaces the retry predicate.
    pub fn with_retry_predicate(
        mut self,
        predicate: impl Fn(&SyncError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Returns the attempt budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay after the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt)
    }

    /// Returns true if the error may be retried under this policy.
    pub fn is_retryable(&self, error: &SyncError) -> bool {
        (self.retryable)(error)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or the budget is exhausted.
    ///
    /// `on_retry(error, attempt, delay)` runs before each backoff sleep. The
    /// token is checked before every attempt and interrupts the sleep.
    pub async fn execute<T, F, Fut, R>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
        mut on_retry: R,
    ) -> SyncResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
        R: FnMut(&SyncError, u32, Duration),
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            attempt += 1;

            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.is_retryable(&error) {
                return Err(error);
            }
            if attempt >= self.max_attempts {
                return Err(SyncError::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.delay_for_attempt(attempt);
            on_retry(&error, attempt, delay);

            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn linear_delays() {
        let policy = SyncPolicy::new();
        assert_eq!(policy.max_attempts(), 10);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(4500));
    }

    #[test]
    fn default_predicate() {
        assert!(is_transient(&SyncError::transport_retryable("reset")));
        assert!(is_transient(&SyncError::protocol("bad")));
        assert!(!is_transient(&SyncError::SessionLost {
            session_id: "s".into()
        }));
        assert!(!is_transient(&SyncError::Cancelled));
    }

    #[test]
    fn no_retry_keeps_one_attempt() {
        assert_eq!(SyncPolicy::no_retry().max_attempts(), 1);
        assert_eq!(SyncPolicy::new().with_max_attempts(0).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn nine_failures_then_success() {
        let policy = SyncPolicy::new();
        let cancel = CancellationToken::new();
        let retries = RefCell::new(Vec::new());

        let result = policy
            .execute(
                &cancel,
                |attempt| async move {
                    if attempt < 10 {
                        Err(SyncError::transport_retryable("503"))
                    } else {
                        Ok(attempt)
                    }
                },
                |_, attempt, delay| retries.borrow_mut().push((attempt, delay)),
            )
            .await;

        assert_eq!(result.unwrap(), 10);
        let retries = retries.into_inner();
        assert_eq!(retries.len(), 9);
        for (i, (attempt, delay)) in retries.iter().enumerate() {
            assert_eq!(*attempt, i as u32 + 1);
            assert_eq!(*delay, Duration::from_millis(500 * (i as u64 + 1)));
        }
        assert!(retries.windows(2).all(|w| w[0].1 < w[1].1));
    }

    #[tokio::test(start_paused = true)]
    async fn session_lost_is_never_retried() {
        let policy = SyncPolicy::new();
        let cancel = CancellationToken::new();
        let mut retries = 0;

        let result: SyncResult<()> = policy
            .execute(
                &cancel,
                |_| async {
                    Err(SyncError::SessionLost {
                        session_id: "s-1".into(),
                    })
                },
                |_, _, _| retries += 1,
            )
            .await;

        assert!(matches!(result, Err(SyncError::SessionLost { .. })));
        assert_eq!(retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_wraps_last_error() {
        let policy = SyncPolicy::new().with_max_attempts(3);
        let cancel = CancellationToken::new();

        let result: SyncResult<()> = policy
            .execute(
                &cancel,
                |attempt| async move {
                    Err(SyncError::transport_retryable(format!("attempt {}", attempt)))
                },
                |_, _, _| {},
            )
            .await;

        match result {
            Err(SyncError::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("attempt 3"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn custom_predicate_stops_retries() {
        let policy = SyncPolicy::new().with_retry_predicate(SyncError::is_retryable);
        let cancel = CancellationToken::new();
        let mut calls = 0;

        let result: SyncResult<()> = policy
            .execute(
                &cancel,
                |_| {
                    calls += 1;
                    async { Err(SyncError::transport_fatal("bad certificate")) }
                },
                |_, _, _| {},
            )
            .await;

        assert!(matches!(
            result,
            Err(SyncError::Transport {
                retryable: false,
                ..
            })
        ));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let policy = SyncPolicy::new().with_backoff(|_| Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let result: SyncResult<()> = policy
            .execute(
                &cancel,
                |_| async { Err(SyncError::transport_retryable("reset")) },
                |_, _, _| trigger.cancel(),
            )
            .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut calls = 0;

        let result: SyncResult<()> = SyncPolicy::new()
            .execute(
                &cancel,
                |_| {
                    calls += 1;
                    async { Ok(()) }
                },
                |_, _, _| {},
            )
            .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(calls, 0);
    }
}
