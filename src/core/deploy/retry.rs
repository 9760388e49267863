//! Exponential backoff with jitter for transient API failures.

use crate::core::config::RetryConfig;
use crate::core::deploy::client::DeployError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_ms: config.backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
            jitter_ms: config.jitter_ms,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
            backoff_multiplier: 1.0,
            jitter_ms: 0,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, DeployError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
    {
        let mut attempts = 0u32;
        let mut backoff_ms = self.backoff_ms;

        loop {
            attempts += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_transient() || attempts >= self.max_attempts {
                        return Err(err);
                    }
                    let jitter = if self.jitter_ms > 0 {
                        rand::thread_rng().gen_range(0..=self.jitter_ms)
                    } else {
                        0
                    };
                    let sleep_ms = backoff_ms.saturating_add(jitter);
                    tracing::warn!(
                        operation = label,
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        sleep_ms,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    if sleep_ms > 0 {
                        sleep(Duration::from_millis(sleep_ms)).await;
                    }
                    backoff_ms = ((backoff_ms as f64) * self.backoff_multiplier).max(1.0) as u64;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_ms: 1,
            backoff_multiplier: 2.0,
            jitter_ms: 0,
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = quick(4)
            .run("create", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DeployError::api(503, "busy"))
                } else {
                    Ok("id-1")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "id-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = quick(4)
            .run("create", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DeployError::api(409, "conflict"))
            })
            .await;
        assert_eq!(result.unwrap_err().status(), Some(409));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = quick(3)
            .run("create", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DeployError::api(429, "slow down"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
