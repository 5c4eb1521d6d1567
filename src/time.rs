//! Calendar helpers for the scraped source's fixed display timezone.
//!
//! The source renders every date and time in UTC+1 regardless of daylight
//! saving, so "today" and "this calendar day" are always evaluated there and
//! never against the host's local clock.

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};

pub const SOURCE_UTC_OFFSET_SECS: i32 = 60 * 60;

pub fn source_offset() -> FixedOffset {
    FixedOffset::east_opt(SOURCE_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Calendar date in the source timezone at instant `now`.
pub fn source_today(now: DateTime<Utc>) -> NaiveDate {
    (now + Duration::seconds(SOURCE_UTC_OFFSET_SECS as i64)).date_naive()
}

/// Interpret a wall-clock date/time shown by the source as an absolute instant.
pub fn from_source_local(date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    source_offset()
        .from_local_datetime(&NaiveDateTime::new(date, time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// UTC instant at which the given source-local calendar day starts.
pub fn source_day_start(date: NaiveDate) -> DateTime<Utc> {
    from_source_local(date, NaiveTime::MIN)
        .unwrap_or_else(|| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}
