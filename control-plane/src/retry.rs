// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Bounded retry with exponential backoff and jitter for idempotent calls.

use std::future::Future;
use std::time::Duration;

/// Outcome of a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// Not worth retrying; returned immediately.
    Stop(E),
    /// May succeed on a later attempt.
    Transient(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Stop(e) | Self::Transient(e) => e,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(E) -> U) -> RetryError<U> {
        match self {
            Self::Stop(e) => RetryError::Stop(f(e)),
            Self::Transient(e) => RetryError::Transient(f(e)),
        }
    }
}

/// Delay before the attempt following `attempt` (1-based): the base delay
/// doubled per prior attempt plus a random fraction of itself.
fn backoff(initial_delay: Duration, attempt: u32) -> Duration {
    let exp = initial_delay.saturating_mul(1u32.wrapping_shl(attempt.saturating_sub(1).min(16)));
    exp + exp.mul_f64(fastrand::f64())
}

/// Runs `operation` up to `max_attempts` times.
///
/// Returns the first success, the first [`RetryError::Stop`], or the last
/// [`RetryError::Transient`] once attempts are exhausted.
pub async fn retry<T, E, F, Fut>(
    max_attempts: u32,
    initial_delay: Duration,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
    E: std::fmt::Debug,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(RetryError::Stop(e)) => return Err(RetryError::Stop(e)),
            Err(RetryError::Transient(e)) if attempt >= max_attempts => {
                tracing::warn!(
                    "[control-plane] giving up after {} attempts: {:?}",
                    attempt,
                    e
                );
                return Err(RetryError::Transient(e));
            }
            Err(RetryError::Transient(e)) => {
                let delay = backoff(initial_delay, attempt);
                tracing::debug!(
                    "[control-plane] attempt {} failed ({:?}), retrying in {:?}",
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_attempted_once() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry(5, Duration::from_millis(100), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RetryError::Stop("access denied"))
        })
        .await;

        assert_eq!(result, Err(RetryError::Stop("access denied")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_last_attempt() {
        let calls = &AtomicU32::new(0);
        let max_attempts = 4;
        let result = retry(max_attempts, Duration::from_millis(100), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < max_attempts {
                Err(RetryError::Transient("throttled"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(max_attempts));
        assert_eq!(calls.load(Ordering::SeqCst), max_attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_retrying() {
        let calls = &AtomicU32::new(0);
        let result = retry(5, Duration::from_millis(100), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 2 {
                Err(RetryError::Transient("throttled"))
            } else {
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_transient() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry(3, Duration::from_millis(100), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(RetryError::Transient(n))
        })
        .await;

        assert_eq!(result, Err(RetryError::Transient(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = &AtomicU32::new(0);
        let _: Result<(), _> = retry(0, Duration::from_millis(100), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RetryError::Transient(()))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows_with_jitter_bounds() {
        let base = Duration::from_millis(100);
        for attempt in 1..=4 {
            let floor = base * 2u32.pow(attempt - 1);
            let delay = backoff(base, attempt);
            assert!(delay >= floor, "{delay:?} < {floor:?}");
            assert!(delay <= floor * 2, "{delay:?} > {:?}", floor * 2);
        }
    }
}
