//! # Election Calendar
//!
//! Fixed boundaries of the voting window plus the constants used to keep
//! early projections stable. The defaults describe the 2022 Brazilian
//! presidential run-off; every value can be overridden from configuration.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::election::phase::{phase, Phase};

/// Official simplified-results feed for the 2022 presidential run-off.
pub const DEFAULT_FEED_URL: &str =
    "https://resultados.tse.jus.br/oficial/ele2022/545/dados-simplificados/br/br-c0001-e000545-r.json";

/// Valid-vote percentage observed in the first round.
pub const FIRST_ROUND_VALID_VOTES_PERCENTAGE: f64 = 95.59;

/// Abstentions observed in the first round.
pub const FIRST_ROUND_TOTAL_ABSTENTIONS: u64 = 32_770_982;

/// Minutes after poll close during which live figures are considered noisy.
pub const DEFAULT_STABLE_WAIT_MINUTES: i64 = 10;

/// The two instants delimiting the voting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionCalendar {
    /// Polls open (inclusive).
    pub poll_open: DateTime<Utc>,
    /// Polls close (inclusive).
    pub poll_close: DateTime<Utc>,
}

impl ElectionCalendar {
    /// Creates a calendar from explicit boundaries.
    pub fn new(poll_open: DateTime<Utc>, poll_close: DateTime<Utc>) -> Self {
        Self { poll_open, poll_close }
    }

    /// Phase of the window at `now`.
    pub fn phase_at(&self, now: DateTime<Utc>) -> Phase {
        phase(now, self.poll_open, self.poll_close)
    }

    /// Phase of the window at the current wall-clock time.
    pub fn phase_now(&self) -> Phase {
        self.phase_at(Utc::now())
    }

    /// Time left until polls close; negative once the window is over.
    pub fn remaining_until_close(&self, now: DateTime<Utc>) -> Duration {
        self.poll_close - now
    }
}

impl Default for ElectionCalendar {
    /// 30 Oct 2022, 08:00 to 17:00 Brasília time (11:00 to 20:00 UTC).
    fn default() -> Self {
        Self {
            poll_open: Utc.with_ymd_and_hms(2022, 10, 30, 11, 0, 0).unwrap(),
            poll_close: Utc.with_ymd_and_hms(2022, 10, 30, 20, 0, 0).unwrap(),
        }
    }
}

/// # Projection Policy
///
/// Decides when live figures are trusted for the expected-valid-votes
/// projection. Until `stable_wait` has elapsed after `poll_close`, or whenever
/// the feed reports no valid-vote percentage, the first-round reference values
/// replace the live percentage and abstentions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionPolicy {
    /// Close of the voting window.
    pub poll_close: DateTime<Utc>,
    /// Grace period after close before live figures are used.
    pub stable_wait: Duration,
    /// Fallback valid-vote percentage.
    pub fallback_valid_percentage: f64,
    /// Fallback abstention count.
    pub fallback_abstentions: u64,
}

impl ProjectionPolicy {
    /// Policy for `calendar` with the given grace period and first-round constants.
    /// A grace period beyond what `Duration` can hold saturates.
    pub fn new(calendar: &ElectionCalendar, stable_wait_minutes: i64) -> Self {
        let stable_wait = Duration::try_minutes(stable_wait_minutes).unwrap_or(if stable_wait_minutes < 0 {
            Duration::MIN
        } else {
            Duration::MAX
        });

        Self {
            poll_close: calendar.poll_close,
            stable_wait,
            fallback_valid_percentage: FIRST_ROUND_VALID_VOTES_PERCENTAGE,
            fallback_abstentions: FIRST_ROUND_TOTAL_ABSTENTIONS,
        }
    }

    /// True while live numbers are still considered unreliable.
    pub fn within_unstable_window(&self, now: DateTime<Utc>) -> bool {
        match self.poll_close.checked_add_signed(self.stable_wait) {
            Some(end) => now <= end,
            // Past the representable range: the window never ends, or ended long ago.
            None => self.stable_wait > Duration::zero(),
        }
    }
}

impl Default for ProjectionPolicy {
    fn default() -> Self {
        Self::new(&ElectionCalendar::default(), DEFAULT_STABLE_WAIT_MINUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_calendar_spans_the_run_off() {
        let calendar = ElectionCalendar::default();
        assert_eq!(calendar.poll_close - calendar.poll_open, Duration::hours(9));
    }

    #[test]
    fn unstable_window_ends_after_the_wait() {
        let policy = ProjectionPolicy::default();
        let close = policy.poll_close;

        assert!(policy.within_unstable_window(close - Duration::hours(1)));
        assert!(policy.within_unstable_window(close + Duration::minutes(10)));
        assert!(!policy.within_unstable_window(close + Duration::minutes(11)));
    }

    #[test]
    fn out_of_range_waits_saturate() {
        let calendar = ElectionCalendar::default();
        let late = calendar.poll_close + Duration::days(365);

        let endless = ProjectionPolicy::new(&calendar, i64::MAX / 1000);
        assert_eq!(endless.stable_wait, Duration::MAX);
        assert!(endless.within_unstable_window(late));

        let huge = ProjectionPolicy::new(&calendar, 200_000_000_000);
        assert!(huge.within_unstable_window(late));

        let negative = ProjectionPolicy::new(&calendar, i64::MIN);
        assert_eq!(negative.stable_wait, Duration::MIN);
        assert!(!negative.within_unstable_window(calendar.poll_close));
    }
}
