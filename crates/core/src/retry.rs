//! Retry classification and exponential backoff shared by the HTTP client and
//! storage writes.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy classification for failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    Retryable,
    Permanent,
}

/// Anything the retry loop can classify.
pub trait Classify {
    fn retry_class(&self) -> RetryClass;
}

impl Classify for crate::errors::Error {
    fn retry_class(&self) -> RetryClass {
        crate::errors::Error::retry_class(self)
    }
}

/// Classify HTTP status into retry behavior.
pub fn classify_http_status(status: u16) -> RetryClass {
    match status {
        408 | 409 | 423 | 425 | 429 => RetryClass::Retryable,
        500..=599 => RetryClass::Retryable,
        _ => RetryClass::Permanent,
    }
}

const MAX_BACKOFF_EXPONENT: u32 = 8;

/// Exponential backoff with jitter, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_retries(3, Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// Policy that retries `max_retries` times after the first attempt.
    pub fn from_retries(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            base_delay,
            max_delay: base_delay.saturating_mul(1 << 5),
        }
    }

    /// A policy that never waits; used by tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Deterministic part of the delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exp = (attempt.saturating_sub(1) as u32).min(MAX_BACKOFF_EXPONENT);
        self.base_delay
            .saturating_mul(1_u32 << exp)
            .min(self.max_delay)
    }

    /// `backoff` plus up to 20% jitter.
    pub fn backoff_with_jitter(&self, attempt: usize) -> Duration {
        let backoff = self.backoff(attempt);
        let backoff_ms = backoff.as_millis() as u64;
        if backoff_ms == 0 {
            return backoff;
        }
        let jitter = rand::thread_rng().gen_range(0..=(backoff_ms / 5).max(1));
        backoff.saturating_add(Duration::from_millis(jitter))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> std::result::Result<T, E>
    where
        E: Classify + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut attempt = 0usize;
        loop {
            attempt = attempt.saturating_add(1);
            match op().await {
                Ok(value) => return Ok(value),
                Err(err)
                    if err.retry_class() == RetryClass::Retryable
                        && attempt < self.max_attempts =>
                {
                    let delay = self.backoff_with_jitter(attempt);
                    debug!(
                        "{} retry attempt {}/{} in {:?}: {}",
                        label,
                        attempt + 1,
                        self.max_attempts,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
