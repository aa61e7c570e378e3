use chrono::{DateTime, Utc};
use db::models::delivery_stats::{DeliveryStats, WindowStats};
use serde::Serialize;

/// Multiplier applied to the send rate while a capacity boost is active.
pub const BOOST_MULTIPLIER: f64 = 4.0;

/// Send rate floor: one email per minute, expressed per week.
const MIN_RATE_PER_WEEK: f64 = 7.0 * 24.0 * 60.0;

const SECONDS_PER_WEEK: f64 = 7.0 * 24.0 * 3600.0;

/// Derived capacity snapshot for one project. Computed on read from the
/// delivery stats and the stored boost expiry; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct CapacityRate {
    pub rate_per_second: f64,
    pub penalty_factor: f64,
    pub is_boost_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boost_expires_at_millis: Option<i64>,
}

/// Throttle factor from bounce/spam history: spam reports weigh 50x a
/// bounce, clamped to [0.1, 1]. A window with no sends carries no penalty.
pub fn penalty_factor(window: &WindowStats) -> f64 {
    if window.sent == 0 {
        return 1.0;
    }
    let failures = window.bounced as f64 + 50.0 * window.marked_as_spam as f64;
    let failure_rate = failures / window.sent as f64;
    (1.0 - failure_rate).clamp(0.1, 1.0)
}

/// Computes the effective send rate for a project.
///
/// The weekly baseline grows with historical volume (eight times the rolling
/// monthly count on top of the configured base), is throttled by the worst
/// recent-window penalty, floored at one email per minute, and quadrupled
/// while a boost is active.
pub fn capacity_rate(
    stats: &DeliveryStats,
    base_hourly_rate: f64,
    boost_expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> CapacityRate {
    let penalty = penalty_factor(&stats.week)
        .min(penalty_factor(&stats.day))
        .min(penalty_factor(&stats.hour));

    let weekly_baseline = base_hourly_rate * 24.0 * 7.0 + 8.0 * stats.month.sent as f64;
    let rate_per_week = (weekly_baseline * penalty).max(MIN_RATE_PER_WEEK);
    let mut rate_per_second = rate_per_week / SECONDS_PER_WEEK;

    let is_boost_active = boost_expires_at.is_some_and(|expires| expires > now);
    if is_boost_active {
        rate_per_second *= BOOST_MULTIPLIER;
    }

    CapacityRate {
        rate_per_second,
        penalty_factor: penalty,
        is_boost_active,
        boost_expires_at_millis: boost_expires_at
            .filter(|expires| *expires > now)
            .map(|expires| expires.timestamp_millis()),
    }
}

/// Converts a fractional per-tick budget into a whole quota: the integer part
/// plus a Bernoulli trial on the remainder, so low rates still send
/// eventually instead of rounding to zero forever.
pub fn stochastic_quota(value: f64, roll: f64) -> u64 {
    let base = value.floor();
    let fractional = value - base;
    base as u64 + u64::from(roll < fractional)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn stats_with_month_sent(sent: u64) -> DeliveryStats {
        DeliveryStats {
            month: WindowStats {
                sent,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn fresh_project_rate_matches_baseline() {
        let rate = capacity_rate(&DeliveryStats::default(), 10_000.0, None, Utc::now());
        let expected = 10_000.0 * 24.0 * 7.0 / (7.0 * 24.0 * 3600.0);
        assert!((rate.rate_per_second - expected).abs() < 1e-9);
        assert_eq!(rate.penalty_factor, 1.0);
        assert!(!rate.is_boost_active);
    }

    #[test]
    fn monthly_volume_raises_the_baseline() {
        let rate = capacity_rate(&stats_with_month_sent(1), 10_000.0, None, Utc::now());
        let expected = (10_000.0 * 24.0 * 7.0 + 8.0) / (7.0 * 24.0 * 3600.0);
        assert!((rate.rate_per_second - expected).abs() < 1e-9);
    }

    #[test]
    fn boost_quadruples_the_rate() {
        let now = Utc::now();
        let base = capacity_rate(&DeliveryStats::default(), 10_000.0, None, now);
        let boosted = capacity_rate(
            &DeliveryStats::default(),
            10_000.0,
            Some(now + Duration::hours(1)),
            now,
        );
        assert!(boosted.is_boost_active);
        assert!((boosted.rate_per_second - 4.0 * base.rate_per_second).abs() < 1e-9);

        let expired = capacity_rate(
            &DeliveryStats::default(),
            10_000.0,
            Some(now - Duration::seconds(1)),
            now,
        );
        assert!(!expired.is_boost_active);
        assert_eq!(expired.rate_per_second, base.rate_per_second);
        assert!(expired.boost_expires_at_millis.is_none());
    }

    #[test]
    fn penalty_is_clamped_and_spam_weighted() {
        let clean = WindowStats {
            sent: 100,
            ..Default::default()
        };
        assert_eq!(penalty_factor(&clean), 1.0);

        let bouncy = WindowStats {
            sent: 100,
            bounced: 20,
            marked_as_spam: 0,
        };
        assert!((penalty_factor(&bouncy) - 0.8).abs() < 1e-9);

        let spammy = WindowStats {
            sent: 100,
            bounced: 0,
            marked_as_spam: 10,
        };
        assert_eq!(penalty_factor(&spammy), 0.1);

        assert_eq!(penalty_factor(&WindowStats::default()), 1.0);
    }

    #[test]
    fn rate_never_drops_below_one_per_minute() {
        let terrible = DeliveryStats {
            hour: WindowStats {
                sent: 10,
                bounced: 0,
                marked_as_spam: 10,
            },
            ..Default::default()
        };
        let rate = capacity_rate(&terrible, 0.0, None, Utc::now());
        assert!((rate.rate_per_second - 1.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn stochastic_quota_rounds_by_roll() {
        assert_eq!(stochastic_quota(2.0, 0.99), 2);
        assert_eq!(stochastic_quota(2.3, 0.2), 3);
        assert_eq!(stochastic_quota(2.3, 0.5), 2);
        assert_eq!(stochastic_quota(0.0, 0.0), 0);
    }
}
