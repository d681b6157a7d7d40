use crate::error::BookingError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

const LOCAL_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"];

pub fn parse_timezone(name: &str) -> Result<Tz, BookingError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| BookingError::Validation(format!("unknown timezone '{name}'")))
}

/// Interprets a wall-clock time in `tz`. Times skipped or repeated by a
/// daylight saving change are rejected.
pub fn local_to_utc(local: &str, tz: Tz) -> Result<DateTime<Utc>, BookingError> {
    let naive = LOCAL_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(local.trim(), format).ok())
        .ok_or_else(|| BookingError::Validation(format!("invalid local time '{local}'")))?;

    tz.from_local_datetime(&naive)
        .single()
        .map(|datetime| datetime.with_timezone(&Utc))
        .ok_or_else(|| {
            BookingError::Validation(format!("local time '{local}' is ambiguous or skipped in {tz}"))
        })
}

pub fn display_in(datetime: DateTime<Utc>, tz: Tz) -> String {
    datetime.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string()
}
