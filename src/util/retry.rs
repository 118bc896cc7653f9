/// Bounded retry policy applied at collaborator adapters

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub backoff: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff: 2,
        }
    }
}

impl RetryPolicy {
    /// Single attempt; used for calls that must never be repeated blindly
    pub const fn never() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            backoff: 1,
        }
    }

    /// Run `op` until it succeeds, the error is not retryable, or attempts run out
    pub async fn run<F, Fut, T, E, P>(&self, label: &str, mut op: F, retryable: P) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && retryable(&e) => {
                    warn!(
                        call = label,
                        attempt,
                        remaining = self.max_attempts - attempt,
                        error = %e,
                        "🔁 Retrying collaborator call"
                    );
                    sleep(delay).await;
                    delay = delay.saturating_mul(self.backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Timeouts, connection failures, throttling and server errors are worth another try
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| match cause.downcast_ref::<reqwest::Error>() {
        Some(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.status().map_or(false, |s| s.as_u16() == 429 || s.is_server_error())
        }
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            backoff: 2,
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let counter = AtomicUsize::new(0);
        let res: Result<u32, String> = quick(4)
            .run(
                "flaky",
                |_| {
                    let current = counter.fetch_add(1, Ordering::Relaxed);
                    async move {
                        if current < 2 {
                            Err("busy".to_string())
                        } else {
                            Ok(7)
                        }
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(res.unwrap(), 7);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn stops_on_permanent_error() {
        let counter = AtomicUsize::new(0);
        let res: Result<u32, String> = quick(5)
            .run(
                "permanent",
                |_| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    async { Err("bad request".to_string()) }
                },
                |e| e != "bad request",
            )
            .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicUsize::new(0);
        let res: Result<(), String> = quick(3)
            .run(
                "down",
                |attempt| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    async move { Err(format!("attempt {}", attempt)) }
                },
                |_| true,
            )
            .await;

        assert_eq!(res.unwrap_err(), "attempt 3");
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn plain_errors_are_not_transient() {
        assert!(!is_transient(&anyhow::anyhow!("schema mismatch")));
    }
}
