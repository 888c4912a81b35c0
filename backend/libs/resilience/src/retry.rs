/// Retry policy with exponential backoff for transient failures
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Wait before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single wait
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 3.0,
        }
    }
}

impl RetryConfig {
    /// Wait applied after the failed attempt with the given zero-based index.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let millis = (self.initial_backoff.as_millis() as f64 * factor)
            .min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Run `op` until it succeeds, fails with an error `should_retry` rejects,
/// or the attempt budget runs out. The last error is returned unchanged.
///
/// `op` receives the zero-based attempt index.
pub async fn retry_if<F, Fut, T, E, P>(config: &RetryConfig, mut op: F, should_retry: P) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt + 1 >= max_attempts || !should_retry(&e) {
                    return Err(e);
                }

                let delay = config.backoff_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig::default();
        let waits: Vec<u64> = (0..4).map(|a| config.backoff_for(a).as_secs()).collect();
        assert_eq!(waits, vec![5, 15, 45, 60]);
    }

    #[tokio::test]
    async fn test_first_success_runs_once() {
        let calls = AtomicU32::new(0);
        let result = retry_if(
            &quick(3),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>("done") }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_throttling_is_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_if(
            &quick(3),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match attempt {
                        0 | 1 => Err("HTTP Error 429".to_string()),
                        n => Ok(n),
                    }
                }
            },
            |e| e.contains("429"),
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_if(
            &quick(5),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("private post".to_string()) }
            },
            |e| e.contains("429"),
        )
        .await;

        assert_eq!(result.unwrap_err(), "private post");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_if(
            &quick(3),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("429 on attempt {attempt}")) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap_err(), "429 on attempt 2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), String> = retry_if(
            &quick(0),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            },
            |_| true,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
