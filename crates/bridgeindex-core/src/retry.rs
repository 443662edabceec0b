//! Exponential backoff retry policy with optional jitter.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Configuration for the retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, the first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    #[serde(default = "default_initial_backoff", with = "millis")]
    pub initial_backoff: Duration,
    /// Maximum backoff delay (caps exponential growth).
    #[serde(default = "default_max_backoff", with = "millis")]
    pub max_backoff: Duration,
    /// Multiplier applied to backoff on each retry.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Add `jitter_fraction * backoff / 2` on top of each delay (0.0 = none).
    #[serde(default)]
    pub jitter_fraction: f64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff() -> Duration { Duration::from_millis(100) }
fn default_max_backoff() -> Duration { Duration::from_secs(10) }
fn default_multiplier() -> f64 { 2.0 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            multiplier: default_multiplier(),
            jitter_fraction: 0.1,
        }
    }
}

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay after the `attempt`-th failure (1-based).
    /// Returns `None` once all attempts are used up.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.config.max_attempts {
            return None;
        }
        Some(self.backoff(attempt))
    }

    /// Uncapped-attempt variant of [`next_delay`](Self::next_delay), used by
    /// loops that retry until cancelled.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.config.initial_backoff.as_millis() as f64 * self.config.multiplier.powi(exp);
        let cap_ms = self.config.max_backoff.as_millis() as f64;
        let capped = base_ms.min(cap_ms);

        // Deterministic pseudo-jitter: +jitter/2
        let jitter_ms = capped * self.config.jitter_fraction * 0.5;
        Duration::from_millis((capped + jitter_ms) as u64)
    }
}

/// Run `op` until it succeeds, attempts run out, or `shutdown` fires.
///
/// `op` receives the 1-based attempt number. The last error is returned when
/// the policy gives up or the wait between attempts is cancelled.
pub async fn retry_async<T, E, F, Fut>(
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        let Some(delay) = policy.next_delay(attempt) else {
            tracing::error!(attempt, error = %err, what, "max attempts exceeded");
            return Err(err);
        };
        tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, what, "retrying");
        tokio::select! {
            _ = shutdown.cancelled() => return Err(err),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Serialize a `Duration` as integer milliseconds.
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
