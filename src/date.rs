//! Date parsing module
//!
//! Certificates print their validity dates as `yyyy-MM-dd HH:mm` in local
//! Lithuanian time. They are read at a fixed UTC+2 offset, with no daylight
//! saving adjustment, and passed on as UTC instants.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use crate::error::{Error, Result};

/// Layout of dates printed on the certificate
pub const CERTIFICATE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Offset the printed dates are interpreted at, in seconds east of UTC
pub const CERTIFICATE_UTC_OFFSET: i32 = 2 * 3600;

/// Parse a certificate date into an absolute instant
///
/// Examples:
/// - `"2023-01-01 00:00"` → 2022-12-31T22:00:00Z
/// - `"2022-06-15 13:30"` → 2022-06-15T11:30:00Z
pub fn parse_certificate_instant(expr: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(expr, CERTIFICATE_DATE_FORMAT)
        .map_err(|e| Error::InvalidDateExpression(format!("{}: {}", expr, e)))?;

    let offset = FixedOffset::east_opt(CERTIFICATE_UTC_OFFSET)
        .ok_or_else(|| Error::InvalidDateExpression("offset out of range".to_string()))?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| Error::InvalidDateExpression(format!("Unable to place {} at UTC+2", expr)))
}

/// Format an instant as ISO-8601 in UTC, second precision
/// Example: "2022-12-31T22:00:00Z"
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}
