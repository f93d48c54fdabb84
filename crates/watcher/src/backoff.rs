use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// Delay schedule between attempts of an operation that must not give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    Fixed(Duration),
    CappedExponential { initial: Duration, max: Duration },
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0 for the first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed(delay) => delay,
            BackoffPolicy::CappedExponential { initial, max } => {
                let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed(Duration::from_secs(1))
    }
}

/// Runs `op` until it succeeds, sleeping per `policy` between attempts.
pub async fn retry_forever<T, E, F, Fut>(policy: BackoffPolicy, operation: &str, mut op: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, attempt, "succeeded after retries");
                }
                return value;
            }
            Err(e) => {
                let delay = policy.delay(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "failed, retrying: {}",
                    e
                );
                sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capped_exponential() {
        let policy = BackoffPolicy::CappedExponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_secs(1));
        assert_eq!(policy.delay(200), Duration::from_secs(1));
    }

    #[test]
    fn test_fixed() {
        let policy = BackoffPolicy::Fixed(Duration::from_secs(2));
        assert_eq!(policy.delay(0), policy.delay(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let mut calls = 0;
        let value = retry_forever(
            BackoffPolicy::Fixed(Duration::from_secs(5)),
            "flaky",
            || {
                calls += 1;
                let result = if calls < 3 { Err("timeout") } else { Ok(calls) };
                async move { result }
            },
        )
        .await;
        assert_eq!(value, 3);
    }
}
