//! Request normalization
//!
//! Turns a raw field tuple into a canonical [`Request`]: the IPv4 source
//! address as its 32-bit integer form, the bracketed log timestamp as a
//! unix epoch, and text fields trimmed with blank dictionary fields mapped
//! to the literal "None" so uniqueness constraints never see empty strings.

use chrono::NaiveDate;
use tracing::warn;

use crate::parser::{ParseError, RawRecord};

/// Fixed month-abbreviation table for the log timestamp format.
/// Matching is case-sensitive, English only.
pub const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Literal stored for required-but-blank dictionary fields.
pub const NONE_TOKEN: &str = "None";

/// A canonical, immutable request. Never updated once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// IPv4 source address in 32-bit integer form.
    pub source_ip: u32,
    /// Unix epoch seconds; 0 when the timestamp could not be fully resolved.
    pub timestamp: i64,
    pub method: String,
    pub route: String,
    pub protocol: String,
    pub http_status: u16,
    pub bytes_sent: u64,
    pub referer: String,
    pub user_agent: String,
}

/// Normalize one raw record into a [`Request`].
///
/// A malformed IP, status or bytes field fails the line. An unrecognized
/// month only zeroes the timestamp (with a warning) and keeps the line.
pub fn normalize(raw: &RawRecord<'_>) -> Result<Request, ParseError> {
    let source_ip = parse_ipv4(raw.source_ip)?;
    let timestamp = parse_timestamp(raw.timestamp)?;
    let http_status: u16 = raw
        .status
        .parse()
        .map_err(|_| ParseError::Status(raw.status.to_string()))?;
    let bytes_sent: u64 = raw
        .bytes_sent
        .parse()
        .map_err(|_| ParseError::BytesSent(raw.bytes_sent.to_string()))?;

    Ok(Request {
        source_ip,
        timestamp,
        method: raw.method.trim().to_string(),
        route: guard_blank(raw.route),
        protocol: raw.protocol.trim().to_string(),
        http_status,
        bytes_sent,
        referer: guard_blank(raw.referer),
        user_agent: raw.user_agent.trim().to_string(),
    })
}

fn parse_ipv4(s: &str) -> Result<u32, ParseError> {
    s.trim()
        .parse::<std::net::Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| ParseError::SourceIp(s.to_string()))
}

/// Trim, and map an empty result to the literal "None".
///
/// "-" is kept as-is: it is the log's own empty marker and a valid
/// dictionary name.
pub fn guard_blank(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        NONE_TOKEN.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse `[DD/Mon/YYYY:HH:MM:SS ±ZZZZ]` into unix epoch seconds (UTC).
///
/// A string that does not have this shape is an error (the line is
/// skipped). A shape-correct string whose month is not in [`MONTHS`] or
/// whose components form no valid date yields `Ok(0)` with a warning, per
/// the normalizer contract.
pub fn parse_timestamp(s: &str) -> Result<i64, ParseError> {
    let err = || ParseError::Timestamp(s.to_string());

    let inner = s
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(err)?;
    let (datetime, zone) = match inner.split_once(' ') {
        Some((d, z)) => (d, Some(z)),
        None => (inner, None),
    };

    let (day, rest) = datetime.split_once('/').ok_or_else(err)?;
    let (month_name, rest) = rest.split_once('/').ok_or_else(err)?;
    let (year, time) = rest.split_once(':').ok_or_else(err)?;
    let mut clock = time.split(':');
    let (hour, minute, second) = match (clock.next(), clock.next(), clock.next(), clock.next()) {
        (Some(h), Some(m), Some(sec), None) => (h, m, sec),
        _ => return Err(err()),
    };

    let day: u32 = day.parse().map_err(|_| err())?;
    let year: i32 = year.parse().map_err(|_| err())?;
    let hour: u32 = hour.parse().map_err(|_| err())?;
    let minute: u32 = minute.parse().map_err(|_| err())?;
    let second: u32 = second.parse().map_err(|_| err())?;

    let Some(month_index) = MONTHS.iter().position(|m| *m == month_name) else {
        warn!(month = month_name, "unknown month in timestamp, using 0");
        return Ok(0);
    };

    let datetime = NaiveDate::from_ymd_opt(year, month_index as u32 + 1, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second));
    let Some(datetime) = datetime else {
        warn!(timestamp = inner, "timestamp components out of range, using 0");
        return Ok(0);
    };

    let mut epoch = datetime.and_utc().timestamp();
    if let Some(zone) = zone {
        match parse_zone_offset(zone) {
            Some(offset_secs) => epoch -= i64::from(offset_secs),
            None => warn!(zone, "unparseable zone offset, assuming UTC"),
        }
    }
    Ok(epoch)
}

/// `±HHMM` → signed seconds east of UTC.
fn parse_zone_offset(zone: &str) -> Option<i32> {
    let (sign, digits) = match zone.as_bytes().first()? {
        b'+' => (1, &zone[1..]),
        b'-' => (-1, &zone[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    Some(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::split_line;

    #[test]
    fn parses_a_utc_timestamp() {
        // 2024-03-10 08:00:00 UTC
        assert_eq!(
            parse_timestamp("[10/Mar/2024:08:00:00 +0000]").unwrap(),
            1_710_057_600
        );
    }

    #[test]
    fn applies_positive_zone_offsets() {
        // 00:47:36 +0100 is 23:47:36 UTC the previous day.
        let with_offset = parse_timestamp("[20/Nov/2022:00:47:36 +0100]").unwrap();
        let utc = parse_timestamp("[19/Nov/2022:23:47:36 +0000]").unwrap();
        assert_eq!(with_offset, utc);
    }

    #[test]
    fn unknown_month_yields_zero_not_error() {
        assert_eq!(parse_timestamp("[10/Mrz/2024:08:00:00 +0000]").unwrap(), 0);
    }

    #[test]
    fn month_matching_is_case_sensitive() {
        assert_eq!(parse_timestamp("[10/mar/2024:08:00:00 +0000]").unwrap(), 0);
    }

    #[test]
    fn out_of_range_day_yields_zero_not_error() {
        assert_eq!(parse_timestamp("[32/Mar/2024:08:00:00 +0000]").unwrap(), 0);
    }

    #[test]
    fn shapeless_timestamp_is_an_error() {
        assert!(parse_timestamp("10/Mar/2024 08:00:00").is_err());
        assert!(parse_timestamp("[yesterday]").is_err());
    }

    #[test]
    fn normalizes_the_reference_line() {
        let line = "203.0.113.5 - - [10/Mar/2024:08:00:00 +0000] \
            \"GET /index.html HTTP/1.1\" 200 512 \"-\" \"Mozilla/5.0 (Linux; Android 10) Chrome/90.0\"";
        let request = normalize(&split_line(line).unwrap()).unwrap();
        assert_eq!(request.source_ip, u32::from(std::net::Ipv4Addr::new(203, 0, 113, 5)));
        assert_eq!(request.timestamp, 1_710_057_600);
        assert_eq!(request.route, "/index.html");
        assert_eq!(request.http_status, 200);
        assert_eq!(request.bytes_sent, 512);
        assert_eq!(request.referer, "-");
    }

    #[test]
    fn blank_route_and_referer_become_none_token() {
        assert_eq!(guard_blank("  "), "None");
        assert_eq!(guard_blank("-"), "-");
        assert_eq!(guard_blank(" /a "), "/a");
    }

    #[test]
    fn malformed_ip_fails_the_line() {
        let line = "999.0.113.5 - - [10/Mar/2024:08:00:00 +0000] \
            \"GET / HTTP/1.1\" 200 512 \"-\" \"ua\"";
        assert!(matches!(
            normalize(&split_line(line).unwrap()),
            Err(ParseError::SourceIp(_))
        ));
    }
}
