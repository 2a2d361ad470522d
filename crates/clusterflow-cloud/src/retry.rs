//! Bounded retry of transient errors and polling for stable state

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Retry configuration for cloud API calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(default = "default_retry_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for a single delay (milliseconds)
    #[serde(default = "default_retry_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_retry_initial_delay() -> u64 {
    500
}
fn default_retry_max_delay() -> u64 {
    10_000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_retry_initial_delay(),
            max_delay_ms: default_retry_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (zero based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff(
            self.initial_delay_ms,
            self.max_delay_ms,
            self.multiplier,
            attempt,
        )
    }
}

/// Polling configuration for "wait for stable state" loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Budget for one polling loop (seconds)
    #[serde(default = "default_wait_timeout")]
    pub timeout_secs: u64,

    /// Delay after the first poll (milliseconds)
    #[serde(default = "default_wait_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for a single delay (milliseconds)
    #[serde(default = "default_wait_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_wait_timeout() -> u64 {
    600
}
fn default_wait_initial_delay() -> u64 {
    1000
}
fn default_wait_max_delay() -> u64 {
    10_000
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_wait_timeout(),
            initial_delay_ms: default_wait_initial_delay(),
            max_delay_ms: default_wait_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl WaitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff(
            self.initial_delay_ms,
            self.max_delay_ms,
            self.multiplier,
            attempt,
        )
    }
}

fn backoff(initial_ms: u64, max_ms: u64, multiplier: f64, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let delay = initial_ms as f64 * multiplier.powi(exponent);
    let delay = if delay.is_finite() {
        (delay as u64).min(max_ms)
    } else {
        max_ms
    };
    Duration::from_millis(delay)
}

/// Run `op`, retrying while it fails with [`CloudError::Transient`].
///
/// Any other error is returned immediately. When the attempts run out the
/// last transient error is wrapped in [`CloudError::RetriesExhausted`].
pub async fn retry_transient<T, F, Fut>(config: &RetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = config.delay_for_attempt(attempt - 1);
                tracing::warn!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient error, retrying"
                );
                sleep(delay).await;
            }
            Err(e) if e.is_transient() => {
                return Err(CloudError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
            Err(e) => return Err(e),
        }
    }
}

/// Poll until `poll` yields a value or the loop's timeout expires.
pub async fn wait_until<T, F, Fut>(config: &WaitConfig, what: &str, mut poll: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    let deadline = started + config.timeout();
    let mut attempt = 0;
    loop {
        if let Some(value) = poll().await? {
            tracing::debug!(
                target_resource = what,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Reached stable state"
            );
            return Ok(value);
        }

        let delay = config.delay_for_attempt(attempt);
        if Instant::now() + delay > deadline {
            return Err(CloudError::Timeout(format!(
                "{} did not reach a stable state within {}s",
                what, config.timeout_secs
            )));
        }
        tracing::trace!(target_resource = what, attempt, "Waiting for stable state");
        sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_calculation() {
        let config = WaitConfig {
            timeout_secs: 60,
            initial_delay_ms: 1000,
            max_delay_ms: 10000,
            multiplier: 2.0,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(8000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(10000)); // capped at max
        assert_eq!(config.delay_for_attempt(400), Duration::from_millis(10000));
    }

    #[test]
    fn test_defaults() {
        let retry: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(retry, RetryConfig::default());
        assert_eq!(retry.max_attempts, 5);
        let wait: WaitConfig = serde_json::from_str(r#"{"timeout_secs": 30}"#).unwrap();
        assert_eq!(wait.timeout_secs, 30);
        assert_eq!(wait.initial_delay_ms, 1000);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_transient(&fast_retry(5), "get", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CloudError::Transient("503".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_keeps_cause() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = retry_transient(&fast_retry(3), "get", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CloudError::Transient("429".into()))
            }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            CloudError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(source.is_transient());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_fatal() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = retry_transient(&fast_retry(5), "create", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CloudError::PermissionDenied("403".into()))
            }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_wait_until_polls_until_ready() {
        let config = WaitConfig {
            timeout_secs: 5,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
        };
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();
        let value = wait_until(&config, "server", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok((n >= 3).then_some("running"))
            }
        })
        .await
        .unwrap();
        assert_eq!(value, "running");
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let config = WaitConfig {
            timeout_secs: 0,
            initial_delay_ms: 10,
            max_delay_ms: 10,
            multiplier: 1.0,
        };
        let err = wait_until(&config, "gateway", || async { Ok(None::<()>) })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Timeout(_)));
    }
}
