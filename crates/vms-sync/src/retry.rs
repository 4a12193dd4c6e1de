//! Exponential backoff for transient CRM and store failures.
//!
//! The delay before retry `n` (1-based) is `base_delay * 2^(n-1)`, capped at
//! `max_delay`. A server-requested wait (HTTP `Retry-After`) lengthens the
//! delay but never past the cap.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use vms_config::RetryConfig;
use vms_crm::CrmError;

use crate::error::SyncError;

/// Errors that can tell whether a retry may help.
pub trait Transient {
    fn is_transient(&self) -> bool;

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Transient for CrmError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        Self::retry_after(self)
    }
}

impl Transient for SyncError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Persistence { transient: true, .. })
    }
}

/// How a retried operation ended without success.
#[derive(Debug)]
pub enum RetryError<E> {
    /// A non-transient error; retrying would not help.
    Fatal(E),
    /// Every attempt failed transiently.
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Fatal(e) | Self::Exhausted { last: e, .. } => e,
        }
    }
}

impl RetryError<SyncError> {
    /// Collapse into a single error. Exhausted persistence retries become a
    /// non-transient persistence failure.
    #[must_use]
    pub fn flatten(self) -> SyncError {
        match self {
            Self::Fatal(e) => e,
            Self::Exhausted { attempts, last } => SyncError::Persistence {
                message: format!("gave up after {attempts} attempts: {last}"),
                transient: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Backoff {
    #[must_use]
    pub const fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails non-transiently, or the attempt
    /// budget is spent.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        E: Transient + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(what, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(RetryError::Fatal(e)),
                Err(e) if attempt >= max_attempts => {
                    tracing::warn!(what, attempts = attempt, error = %e, "retries exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    let delay = e
                        .retry_after()
                        .map_or_else(|| self.delay_for(attempt), |hint| hint.max(self.delay_for(attempt)))
                        .min(self.max_delay);
                    tracing::warn!(
                        what,
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// [`Self::run`] for store calls, collapsing the outcome into a
    /// [`SyncError`].
    pub async fn persist<T, F, Fut>(&self, what: &str, op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        self.run(what, op).await.map_err(RetryError::flatten)
    }
}
