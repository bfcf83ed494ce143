//! Server-reported quota tracking.
//!
//! The tracker keeps the last remaining-quota and reset-time signals seen on
//! a response and decides whether the next live request should wait for the
//! quota window to reset. Signals are only trusted right after a response;
//! each response that carries them overwrites the previous state.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};

use crate::http::HttpResponse;

/// Default floor below which the client pauses until the quota resets.
pub const MIN_RATE_LIMIT: u64 = 10;

/// Highest accepted floor; larger values are clamped.
pub const MAX_RATE_LIMIT: u64 = 500;

/// Quota state as last reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitState {
    /// Remaining requests in the current window, if ever reported.
    pub remaining: Option<u64>,
    /// When the current window resets, if ever reported.
    pub reset_at: Option<DateTime<Utc>>,
    /// When the state was last refreshed from a response.
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Quota signals extracted from a single response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitSignals {
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Pulls quota signals out of a response.
///
/// Field names differ between providers, so the tracker only depends on this
/// trait.
pub trait RateLimitExtractor: Send + Sync {
    fn extract(&self, response: &HttpResponse) -> RateLimitSignals;
}

/// Reads quota signals from response headers.
///
/// The reset header is expected to hold a UNIX timestamp in seconds.
#[derive(Debug, Clone)]
pub struct HeaderRateLimitExtractor {
    remaining_header: String,
    reset_header: String,
}

impl HeaderRateLimitExtractor {
    pub fn new(remaining_header: impl Into<String>, reset_header: impl Into<String>) -> Self {
        Self {
            remaining_header: remaining_header.into(),
            reset_header: reset_header.into(),
        }
    }
}

impl Default for HeaderRateLimitExtractor {
    fn default() -> Self {
        Self::new("X-RateLimit-Remaining", "X-RateLimit-Reset")
    }
}

impl RateLimitExtractor for HeaderRateLimitExtractor {
    fn extract(&self, response: &HttpResponse) -> RateLimitSignals {
        let remaining = response
            .header(&self.remaining_header)
            .and_then(|v| v.trim().parse::<u64>().ok());
        let reset_at = response
            .header(&self.reset_header)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|epoch| DateTime::from_timestamp(epoch, 0));
        RateLimitSignals {
            remaining,
            reset_at,
        }
    }
}

/// Tracks quota state for one client instance.
pub struct RateLimitTracker {
    sleep_for_rate: bool,
    min_rate_to_sleep: u64,
    extractor: Box<dyn RateLimitExtractor>,
    state: Mutex<RateLimitState>,
    floor_reported: AtomicBool,
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("sleep_for_rate", &self.sleep_for_rate)
            .field("min_rate_to_sleep", &self.min_rate_to_sleep)
            .field("state", &self.state())
            .finish()
    }
}

impl RateLimitTracker {
    /// Create a tracker reading the default rate-limit headers.
    ///
    /// A floor above [`MAX_RATE_LIMIT`] is clamped to it.
    pub fn new(sleep_for_rate: bool, min_rate_to_sleep: u64) -> Self {
        let min_rate_to_sleep = if min_rate_to_sleep > MAX_RATE_LIMIT {
            tracing::warn!(
                requested = min_rate_to_sleep,
                max = MAX_RATE_LIMIT,
                "Minimum rate to sleep is above the maximum allowed; clamping"
            );
            MAX_RATE_LIMIT
        } else {
            min_rate_to_sleep
        };

        Self {
            sleep_for_rate,
            min_rate_to_sleep,
            extractor: Box::new(HeaderRateLimitExtractor::default()),
            state: Mutex::new(RateLimitState::default()),
            floor_reported: AtomicBool::new(false),
        }
    }

    /// Replace the signal extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: impl RateLimitExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn min_rate_to_sleep(&self) -> u64 {
        self.min_rate_to_sleep
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> RateLimitState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Whether the last reported quota is at or below the floor.
    pub fn floor_reached(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        matches!(state.remaining, Some(remaining) if remaining <= self.min_rate_to_sleep)
    }

    /// True once per floor crossing: the first call after the quota drops to
    /// the floor, then false until a response reports it above the floor again.
    pub fn floor_newly_reached(&self) -> bool {
        self.floor_reached() && !self.floor_reported.swap(true, Ordering::AcqRel)
    }

    /// Whether the next live request should wait for the quota to reset.
    ///
    /// True only when sleeping is enabled, the floor is reached and a reset
    /// time is known.
    pub fn should_sleep(&self) -> bool {
        if !self.sleep_for_rate || !self.floor_reached() {
            return false;
        }
        self.state().reset_at.is_some()
    }

    /// Time left until the known reset, zero if it already passed or is unknown.
    pub fn time_to_reset(&self) -> StdDuration {
        self.state()
            .reset_at
            .and_then(|reset_at| (reset_at - Utc::now()).to_std().ok())
            .unwrap_or(StdDuration::ZERO)
    }

    /// Wait until the known reset time. Returns immediately when it has passed.
    pub async fn sleep_until_reset(&self) {
        let wait = self.time_to_reset();
        if wait.is_zero() {
            return;
        }

        tracing::info!(
            seconds = wait.as_secs(),
            "Rate limit exhausted, sleeping until reset"
        );
        tokio::time::sleep(wait).await;
        tracing::debug!("Rate limit wait finished");
    }

    /// Refresh the state from a response.
    ///
    /// Signals missing from the response keep their previous values.
    pub fn update(&self, response: &HttpResponse) {
        let signals = self.extractor.extract(response);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(remaining) = signals.remaining {
            state.remaining = Some(remaining);
        }
        if let Some(reset_at) = signals.reset_at {
            state.reset_at = Some(reset_at);
        }
        state.last_checked_at = Some(Utc::now());

        if !matches!(state.remaining, Some(remaining) if remaining <= self.min_rate_to_sleep) {
            self.floor_reported.store(false, Ordering::Release);
        }

        tracing::trace!(
            remaining = ?state.remaining,
            reset_at = ?state.reset_at,
            "Rate limit updated"
        );
    }
}
