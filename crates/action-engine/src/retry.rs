//! Retry control for the resolve-and-execute pipeline.
//!
//! Attempts are numbered from 1. Only retryable errors earn another pass;
//! fatal errors return immediately. The delay before attempt n+1 grows
//! linearly as `base_delay * n`, and cancellation is honored both between
//! attempts and during backoff sleeps.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::ExecError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive `attempt_fn` until it succeeds, fails fatally, exhausts the
    /// attempt budget, or the token fires. The closure receives the 1-based
    /// attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> Result<T, ExecError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExecError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            match attempt_fn(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if attempt >= max_attempts {
                        warn!(attempts = attempt, error = %err, "retries exhausted");
                        return Err(ExecError::Exhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        });
                    }
                    let delay = self.policy.base_delay * attempt;
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ExecError::Cancelled),
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ActionError, ValidationError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn fast_controller(max_attempts: u32) -> RetryController {
        RetryController::new(RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn success_returns_on_first_attempt() {
        let controller = fast_controller(3);
        let cancel = CancellationToken::new();
        let result = controller.run(&cancel, |attempt| async move { Ok(attempt) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn fatal_error_gets_exactly_one_attempt() {
        let controller = fast_controller(3);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let result: Result<(), ExecError> = controller
            .run(&cancel, move |_| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(ExecError::Validation(ValidationError::violation(
                        "params.url",
                        "missing",
                    )))
                }
            })
            .await;
        assert!(matches!(result, Err(ExecError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_error_uses_the_full_budget_then_exhausts() {
        let controller = RetryController::new(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
        });
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let started = Instant::now();
        let result: Result<(), ExecError> = controller
            .run(&cancel, move |_| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(ExecError::Action(ActionError::WaitTimeout(10)))
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(ExecError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ExecError::Action(ActionError::WaitTimeout(_))));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        // Linear backoff: 25ms after attempt 1, 50ms after attempt 2.
        assert!(started.elapsed() >= Duration::from_millis(75));
    }

    #[tokio::test]
    async fn recovery_stops_the_retry_loop() {
        let controller = fast_controller(5);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let result = controller
            .run(&cancel, move |attempt| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err(ExecError::Action(ActionError::WaitTimeout(10)))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_before_the_first_attempt() {
        let controller = fast_controller(3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let result: Result<(), ExecError> = controller
            .run(&cancel, move |_| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        assert!(matches!(result, Err(ExecError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_backoff_sleep() {
        let controller = RetryController::new(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
        });
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let started = Instant::now();
        let result: Result<(), ExecError> = controller
            .run(&cancel, |_| async {
                Err(ExecError::Action(ActionError::WaitTimeout(1)))
            })
            .await;
        assert!(matches!(result, Err(ExecError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
