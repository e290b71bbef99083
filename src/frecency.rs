use chrono::{DateTime, Duration, Utc};

const WEIGHT_UNKNOWN: f64 = 10.0;
const WEIGHT_HOURS: f64 = 100.0;
const WEIGHT_DAY: f64 = 70.0;
const WEIGHT_WEEK: f64 = 50.0;
const WEIGHT_MONTH: f64 = 30.0;
const WEIGHT_OLD: f64 = 10.0;

/// Recency weight of a command last run at `timestamp`, measured against `now`.
pub fn recency_weight_at(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(ts) = timestamp else {
        return WEIGHT_UNKNOWN;
    };
    let age = now - ts;
    if age < Duration::hours(4) {
        WEIGHT_HOURS
    } else if age < Duration::days(1) {
        WEIGHT_DAY
    } else if age < Duration::weeks(1) {
        WEIGHT_WEEK
    } else if age < Duration::days(30) {
        WEIGHT_MONTH
    } else {
        WEIGHT_OLD
    }
}

pub fn recency_weight(timestamp: Option<DateTime<Utc>>) -> f64 {
    recency_weight_at(timestamp, Utc::now())
}

/// `1 + log10(frequency)`, floored so that any frequency below 1 weighs 1.
pub fn frequency_weight(frequency: i64) -> f64 {
    1.0 + (frequency.max(1) as f64).log10()
}

pub fn frecency_score_at(
    frequency: i64,
    most_recent: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> f64 {
    frequency_weight(frequency) * recency_weight_at(most_recent, now)
}

pub fn frecency_score(frequency: i64, most_recent: Option<DateTime<Utc>>) -> f64 {
    frequency_weight(frequency) * recency_weight(most_recent)
}
