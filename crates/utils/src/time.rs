use chrono::{DateTime, TimeZone, Utc};

/// Millisecond timestamps are the wire format for every `*_at_millis` field.
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn opt_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(to_millis)
}

/// Inverse of [`to_millis`]; out-of-range values are clamped by chrono.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}
