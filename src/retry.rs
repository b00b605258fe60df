// src/retry.rs

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    None,
    Exponential { base_ms: u64, max_ms: u64 },
}

/// How many times to re-run a failed attempt, and how long to wait between.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    /// One retry, straight away.
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Backoff::None,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Pause before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Exponential { base_ms, max_ms } => {
                let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }

    /// Run `op` until it succeeds or attempts run out. `op` receives the
    /// 1-based attempt number. On exhaustion the last error is returned
    /// together with the number of attempts made.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, (u32, E)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => return Err((attempt, e)),
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(attempt, of = attempts, error = %e, delay_ms = delay.as_millis() as u64, "Attempt failed, retrying");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delays() {
        let none = RetryPolicy::default();
        assert_eq!(none.attempts(), 2);
        assert_eq!(none.delay_for(1), Duration::ZERO);

        let exp = RetryPolicy {
            max_retries: 5,
            backoff: Backoff::Exponential {
                base_ms: 100,
                max_ms: 1000,
            },
        };
        assert_eq!(exp.delay_for(1), Duration::from_millis(100));
        assert_eq!(exp.delay_for(2), Duration::from_millis(200));
        assert_eq!(exp.delay_for(3), Duration::from_millis(400));
        assert_eq!(exp.delay_for(10), Duration::from_millis(1000));
        assert_eq!(exp.delay_for(200), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_retries_once_then_gives_up() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run(|_| {
                calls.set(calls.get() + 1);
                async { Err::<(), _>("bad json") }
            })
            .await;
        assert_eq!(result, Err((2, "bad json")));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_second_attempt_succeeds() {
        let result = RetryPolicy::default()
            .run(|attempt| async move { if attempt == 2 { Ok(attempt) } else { Err("nope") } })
            .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn test_zero_retries() {
        let policy = RetryPolicy {
            max_retries: 0,
            backoff: Backoff::None,
        };
        let result: Result<(), _> = policy.run(|_| async { Err::<(), _>("x") }).await;
        assert_eq!(result, Err((1, "x")));
    }

    #[test]
    fn test_from_toml() {
        let policy: RetryPolicy =
            toml::from_str("max_retries = 3\nbackoff = { kind = \"exponential\", base_ms = 50, max_ms = 500 }")
                .unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(
            policy.backoff,
            Backoff::Exponential {
                base_ms: 50,
                max_ms: 500
            }
        );
    }
}
