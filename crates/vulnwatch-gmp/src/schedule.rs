//! iCalendar documents for engine schedules

use chrono::{DateTime, Duration, Utc};

use vulnwatch_core::{Error, Result};

const STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Check a recurrence token before it is embedded in an `RRULE` line
///
/// The token is passed through as given apart from surrounding whitespace;
/// the engine decides whether it understands it.
pub fn normalize_frequency(frequency: &str) -> Result<String> {
    let token = frequency.trim();
    if token.is_empty() {
        return Err(Error::InvalidInput {
            field: "frequency".into(),
            message: "must not be empty".into(),
        });
    }
    if token
        .chars()
        .any(|c| c.is_control() || c == ';' || c == ':' || c.is_whitespace())
    {
        return Err(Error::InvalidInput {
            field: "frequency".into(),
            message: format!("'{}' is not a single recurrence token", token),
        });
    }
    Ok(token.to_string())
}

/// First run time for a schedule created at `now`
pub fn first_run(now: DateTime<Utc>, delay_minutes: u32) -> DateTime<Utc> {
    now + Duration::minutes(i64::from(delay_minutes))
}

/// Build a single-event calendar that recurs at `frequency` from `start`
pub fn build_icalendar(frequency: &str, start: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let uid = format!("{}-{}@vulnwatch", now.timestamp_millis(), frequency);
    [
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//vulnwatch//scan schedule//EN".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{}", uid),
        format!("DTSTAMP:{}", now.format(STAMP_FORMAT)),
        format!("DTSTART:{}", start.format(STAMP_FORMAT)),
        format!("RRULE:FREQ={}", frequency),
        "END:VEVENT".to_string(),
        "END:VCALENDAR".to_string(),
    ]
    .join("\r\n")
        + "\r\n"
}
