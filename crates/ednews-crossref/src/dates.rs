//! Crossref date handling.
//!
//! Crossref dates arrive as `{"date-parts": [[Y, M, D]]}` with trailing
//! parts optional, sometimes with a `date-time` string alongside.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

/// Message fields checked for a publication date, in order.
const DATE_FIELDS: &[&str] = &[
    "created",
    "published-print",
    "published-online",
    "issued",
    "published",
];

/// Turn a `date-parts` value into `YYYY-MM-DD`.
///
/// A missing month or day becomes `01`. Out-of-range components are
/// clamped to the nearest valid calendar value. Anything without a year
/// (`[]`, `[[]]`, `null`, non-numeric parts) yields an empty string.
#[must_use]
pub fn normalize_date_parts(date_parts: &Value) -> String {
    let Some(parts) = date_parts
        .as_array()
        .and_then(|outer| outer.first())
        .and_then(Value::as_array)
    else {
        return String::new();
    };

    let Some(year) = parts.first().and_then(part_as_i64) else {
        return String::new();
    };
    let Ok(year) = i32::try_from(year.clamp(1, 9999)) else {
        return String::new();
    };
    let month = parts.get(1).and_then(part_as_i64).unwrap_or(1).clamp(1, 12);
    let day = parts.get(2).and_then(part_as_i64).unwrap_or(1).clamp(1, 31);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (month, mut day) = (month as u32, day as u32);
    loop {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return date.format("%Y-%m-%d").to_string();
        }
        if day <= 28 {
            return String::new();
        }
        day -= 1;
    }
}

/// Parts are usually integers but occasionally strings.
fn part_as_i64(part: &Value) -> Option<i64> {
    part.as_i64()
        .or_else(|| part.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Best-effort publication date for a Crossref work message.
///
/// Structured `date-parts` win over `date-time` within each field, and
/// fields are tried in the order `created`, `published-print`,
/// `published-online`, `issued`, `published`.
#[must_use]
pub fn published_from_message(message: &Value) -> Option<String> {
    DATE_FIELDS.iter().find_map(|field| {
        let obj = message.get(*field)?;
        let from_parts = obj
            .get("date-parts")
            .map(normalize_date_parts)
            .filter(|d| !d.is_empty());
        from_parts.or_else(|| {
            obj.get("date-time")
                .and_then(Value::as_str)
                .and_then(normalize_date_time)
        })
    })
}

/// Normalize a full timestamp to RFC 3339 in UTC.
fn normalize_date_time(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).to_rfc3339())
}
