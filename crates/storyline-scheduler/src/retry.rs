//! Bounded retry with a fixed delay schedule.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// How many times to try an operation and how long to wait between tries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Wait after the Nth failed attempt; the last entry repeats.
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    /// 3 attempts, waiting 5s, 15s, 45s.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![
                Duration::from_secs(5),
                Duration::from_secs(15),
                Duration::from_secs(45),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts,
            delays,
        }
    }

    /// Same attempts, no waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Vec::new())
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.delays.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt.max(1) as usize - 1).min(self.delays.len() - 1);
        self.delays[idx]
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// A successful result and the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// The last error after giving up.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts.
///
/// `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    is_retryable: P,
) -> Result<Retried<T>, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                debug!(label, attempt, "operation succeeded");
                return Ok(Retried {
                    value,
                    attempts: attempt,
                });
            }
            Err(error) if attempt < max_attempts && is_retryable(&error) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "attempt failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                warn!(label, attempt, error = %error, "giving up");
                return Err(Exhausted {
                    error,
                    attempts: attempt,
                });
            }
        }
    }
}

/// [`retry`] with every error treated as retryable.
pub async fn retry_all<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    op: F,
) -> Result<Retried<T>, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry(policy, label, op, |_| true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let started = tokio::time::Instant::now();

        let result = retry_all(&RetryPolicy::default(), "test", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("failure {}", n)) } else { Ok("done") }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 5s after the first failure, 15s after the second
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(20));
        assert!(elapsed < Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let result: Result<Retried<()>, _> =
            retry_all(&RetryPolicy::default(), "test", |attempt| async move {
                Err(format!("failure {}", attempt))
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.error, "failure 3");
        assert_eq!(exhausted.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<Retried<()>, _> = retry(
            &RetryPolicy::default(),
            "test",
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            },
            |e: &String| e != "fatal",
        )
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let result = retry_all(&RetryPolicy::immediate(0), "test", |_| async {
            Ok::<_, String>(7)
        })
        .await
        .unwrap();
        assert_eq!(result.attempts, 1);
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_secs(15));
        assert_eq!(policy.delay_after(3), Duration::from_secs(45));
        // Last delay repeats
        assert_eq!(policy.delay_after(10), Duration::from_secs(45));
        assert_eq!(RetryPolicy::immediate(5).delay_after(2), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn delay_is_always_from_schedule(
            delays in prop::collection::vec(0u64..1000, 1..6),
            attempt in 0u32..50,
        ) {
            let policy = RetryPolicy::new(
                10,
                delays.iter().map(|ms| Duration::from_millis(*ms)).collect(),
            );
            let delay = policy.delay_after(attempt);
            prop_assert!(policy.delays.contains(&delay));
        }

        #[test]
        fn delay_non_decreasing_for_sorted_schedule(
            mut delays in prop::collection::vec(0u64..1000, 1..6),
            a in 1u32..20,
            b in 1u32..20,
        ) {
            delays.sort();
            let policy = RetryPolicy::new(
                10,
                delays.iter().map(|ms| Duration::from_millis(*ms)).collect(),
            );
            if a <= b {
                prop_assert!(policy.delay_after(a) <= policy.delay_after(b));
            }
        }
    }
}
