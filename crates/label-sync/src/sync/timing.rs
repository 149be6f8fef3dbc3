//! Sync timing utilities: clock abstraction, freshness and cooldown checks
//!
//! The predicates are pure functions of `now` so they can be tested without
//! a running engine.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        if let Ok(delta) = TimeDelta::from_std(by) {
            let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
            *now = *now + delta;
        }
    }

    /// Move the clock backward
    pub fn rewind(&self, by: Duration) {
        if let Ok(delta) = TimeDelta::from_std(by) {
            let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
            *now = *now - delta;
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Time elapsed between `since` and `now`; None if `since` lies in the future
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    (now - since).to_std().ok()
}

/// Check whether data fetched at `fetched_at` is still within its TTL.
///
/// Fresh iff `now - fetched_at < ttl`. A timestamp in the future (clock
/// skew) counts as fresh.
pub fn is_fresh(fetched_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    match elapsed(fetched_at, now) {
        Some(age) => age < ttl,
        None => true,
    }
}

/// Check if enough time has elapsed since the last success to allow a new request.
///
/// # Arguments
/// * `last_success_at` - When the last successful request completed (None if never)
/// * `now` - The current time
/// * `cooldown` - Minimum time that must elapse between requests
///
/// # Returns
/// `true` if enough time has passed (or never succeeded), `false` if still in cooldown
pub fn cooldown_elapsed(
    last_success_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> bool {
    match last_success_at {
        Some(last) => match elapsed(last, now) {
            Some(age) => age >= cooldown,
            None => false,
        },
        None => true,
    }
}
