// src/pipeline/freshness.rs

//! Rolling recency cutoff.
//!
//! Applied before the done-set check so a stale listing never reaches the
//! sink; the orchestrator marks it done so it is not fetched again within
//! the same generation.

use chrono::{DateTime, Duration, Utc};

/// Decides whether a listing is recent enough to deliver.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessFilter {
    window_days: u32,
    /// Fixed "now", used by tests
    reference: Option<DateTime<Utc>>,
}

impl FreshnessFilter {
    /// Filter with the given window; `0` disables it.
    pub fn new(window_days: u32) -> Self {
        Self {
            window_days,
            reference: None,
        }
    }

    /// Filter evaluated against a fixed reference time.
    pub fn at(window_days: u32, now: DateTime<Utc>) -> Self {
        Self {
            window_days,
            reference: Some(now),
        }
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    pub fn is_enabled(&self) -> bool {
        self.window_days > 0
    }

    pub fn accepts(&self, observed_at: DateTime<Utc>) -> bool {
        let now = self.reference.unwrap_or_else(Utc::now);
        accepts(observed_at, self.window_days, now)
    }
}

/// `true` when the window is disabled or `now - observed_at` fits in it.
///
/// Timestamps in the future are accepted.
pub fn accepts(observed_at: DateTime<Utc>, window_days: u32, now: DateTime<Utc>) -> bool {
    if window_days == 0 {
        return true;
    }
    now.signed_duration_since(observed_at) <= Duration::days(i64::from(window_days))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_boundaries() {
        let now = Utc::now();
        assert!(!accepts(now - Duration::days(31), 30, now));
        assert!(accepts(now - Duration::days(30), 30, now));
        assert!(accepts(now - Duration::days(29), 30, now));
    }

    #[test]
    fn test_disabled_window_accepts_everything() {
        let now = Utc::now();
        assert!(accepts(now - Duration::days(31), 0, now));
        assert!(accepts(now - Duration::days(3650), 0, now));
        assert!(!FreshnessFilter::new(0).is_enabled());
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let now = Utc::now();
        assert!(FreshnessFilter::at(7, now).accepts(now + Duration::hours(5)));
    }
}
