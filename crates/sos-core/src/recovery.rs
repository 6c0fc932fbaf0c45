//! Retry and timeout policy for remote calls
//!
//! Every attempt against the emergency service is bounded by the request
//! timeout. Create and activate run with a multi-attempt [`RetryConfig`] and
//! back off between recoverable failures (see [`SessionError::is_recoverable`]);
//! everything else runs with [`RetryConfig::none`].

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};
use crate::events::Operation;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor applied per attempt
    pub backoff_multiplier: f64,
    /// Spread each delay by up to ±10%
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Short fixed-ratio backoff, used by tests and the demo backend
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            use_jitter: false,
        }
    }

    /// Pause after failed attempt number `failed` (1-based), before jitter
    pub fn backoff(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.use_jitter {
            return delay;
        }
        let spread = (rand::random::<f64>() - 0.5) * 0.2;
        delay.mul_f64(1.0 + spread)
    }
}

/// Run `call` under `policy`, each attempt bounded by `limit`.
///
/// An attempt that outlives `limit` fails with
/// [`SessionError::OperationTimeout`], which counts as recoverable.
pub async fn call_with_retry<T, F, Fut>(
    operation: Operation,
    policy: &RetryConfig,
    limit: Duration,
    mut call: F,
) -> SessionResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SessionResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let error = match with_timeout(operation, limit, call()).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(%operation, attempt, "Remote call recovered");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if attempt >= attempts || !error.is_recoverable() {
            warn!(
                %operation,
                attempt,
                attempts,
                error = %error,
                category = error.category(),
                "Remote call failed"
            );
            return Err(error);
        }

        let pause = policy.jittered(policy.backoff(attempt));
        debug!(
            %operation,
            attempt,
            error = %error,
            pause_ms = pause.as_millis() as u64,
            "Remote call failed, backing off"
        );
        sleep(pause).await;
        attempt += 1;
    }
}

/// Bound a single remote call by `limit`
pub async fn with_timeout<T, F>(operation: Operation, limit: Duration, call: F) -> SessionResult<T>
where
    F: Future<Output = SessionResult<T>>,
{
    timeout(limit, call).await.unwrap_or_else(|_| {
        debug!(%operation, limit_ms = limit.as_millis() as u64, "Remote call timed out");
        Err(SessionError::OperationTimeout {
            duration_ms: limit.as_millis() as u64,
        })
    })
}
