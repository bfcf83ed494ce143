//! Flat-interval retry for transient request failures.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};

use crate::bitbucket::{BitbucketError, short_error_message};

/// Default number of retries after the first attempt.
pub const MAX_RETRIES: usize = 5;

/// Default pause between attempts, in seconds.
pub const DEFAULT_SLEEP_TIME: u64 = 1;

/// Statuses retried by default.
pub const DEFAULT_RETRY_STATUSES: &[u16] = &[403, 408, 423, 500, 502, 503, 504];

/// Configuration for retry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Pause between attempts.
    pub delay: Duration,
    /// Maximum number of retries after the first attempt.
    pub max_retries: usize,
    /// HTTP statuses that are treated as transient.
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(DEFAULT_SLEEP_TIME),
            max_retries: MAX_RETRIES,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(delay: Duration, max_retries: usize) -> Self {
        Self {
            delay,
            max_retries,
            ..Self::default()
        }
    }

    /// Replace the transient status allow-list.
    #[must_use]
    pub fn with_retry_statuses(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.retry_statuses = statuses.into();
        self
    }

    /// Whether `status` is on the transient allow-list.
    pub fn is_transient_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Build the constant backoff strategy for this configuration.
    #[must_use]
    pub fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.max_retries)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the retry ceiling is reached.
///
/// A retryable error still present after the last attempt is wrapped in
/// [`BitbucketError::RetryExhausted`]. Non-retryable errors are returned as-is
/// after the attempt that produced them.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    target: &str,
    mut operation: F,
) -> Result<T, BitbucketError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BitbucketError>>,
{
    let attempt = AtomicUsize::new(0);

    let retry_op = || {
        attempt.fetch_add(1, Ordering::SeqCst);
        operation()
    };

    let result = retry_op
        .retry(config.backoff())
        .notify(|err, dur| {
            tracing::warn!(
                target_url = %target,
                attempt = attempt.load(Ordering::SeqCst),
                retry_in = ?dur,
                "Request failed, retrying: {}",
                short_error_message(err)
            );
        })
        .when(BitbucketError::is_retryable)
        .await;

    match result {
        Err(err) if err.is_retryable() => Err(BitbucketError::RetryExhausted {
            attempts: attempt.load(Ordering::SeqCst),
            last: Box::new(err),
        }),
        other => other,
    }
}
