//! Access-log parsing
//!
//! Splits combined-log-format lines into raw fields and normalizes them
//! into typed [`Request`] values. Parsing failures are per-line: the
//! offending line is reported and skipped, never fatal to the batch.

pub mod normalizer;

pub use normalizer::{normalize, Request};

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line does not match the combined log format")]
    Shape,
    #[error("request field {0:?} is not \"METHOD ROUTE PROTOCOL\"")]
    RequestLine(String),
    #[error("invalid source ip {0:?}")]
    SourceIp(String),
    #[error("unparseable timestamp {0:?}")]
    Timestamp(String),
    #[error("invalid status {0:?}")]
    Status(String),
    #[error("invalid bytes-sent {0:?}")]
    BytesSent(String),
}

/// One log line split into its raw text fields, borrowed from the line.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    pub source_ip: &'a str,
    /// Still bracketed: `[10/Mar/2024:08:00:00 +0000]`.
    pub timestamp: &'a str,
    pub method: &'a str,
    pub route: &'a str,
    pub protocol: &'a str,
    pub status: &'a str,
    pub bytes_sent: &'a str,
    pub referer: &'a str,
    pub user_agent: &'a str,
}

/// Split one combined-log line:
/// `IP - IDENT [TIMESTAMP] "METHOD ROUTE PROTOCOL" STATUS BYTES "REFERER" "UA"`.
///
/// A linear scan over the known delimiters; no regex engine on the hot path.
pub fn split_line(line: &str) -> Result<RawRecord<'_>, ParseError> {
    let line = line.trim_end();

    let (source_ip, rest) = line.split_once(' ').ok_or(ParseError::Shape)?;
    // "- IDENT": the unused identd fields before the timestamp.
    let rest = rest.strip_prefix("- ").ok_or(ParseError::Shape)?;
    let (_ident, rest) = rest.split_once(' ').ok_or(ParseError::Shape)?;

    let rest = rest.trim_start();
    if !rest.starts_with('[') {
        return Err(ParseError::Shape);
    }
    let close = rest.find(']').ok_or(ParseError::Shape)?;
    let timestamp = &rest[..=close];
    let rest = rest[close + 1..].trim_start();

    let (request_line, rest) = take_quoted(rest)?;
    let mut parts = request_line.split(' ');
    let (method, route, protocol) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(r), Some(p), None) => (m, r, p),
        _ => return Err(ParseError::RequestLine(request_line.to_string())),
    };

    let rest = rest.trim_start();
    let (status, rest) = rest.split_once(' ').ok_or(ParseError::Shape)?;
    let rest = rest.trim_start();
    let (bytes_sent, rest) = rest.split_once(' ').ok_or(ParseError::Shape)?;

    let (referer, rest) = take_quoted(rest.trim_start())?;
    let (user_agent, _) = take_quoted(rest.trim_start())?;

    Ok(RawRecord {
        source_ip,
        timestamp,
        method,
        route,
        protocol,
        status,
        bytes_sent,
        referer,
        user_agent,
    })
}

fn take_quoted(s: &str) -> Result<(&str, &str), ParseError> {
    let inner = s.strip_prefix('"').ok_or(ParseError::Shape)?;
    let close = inner.find('"').ok_or(ParseError::Shape)?;
    Ok((&inner[..close], &inner[close + 1..]))
}

/// Parse a whole log file's worth of lines.
///
/// Bad lines are skipped with a warning; the return value carries how many
/// were dropped so the ingest summary can report it.
pub fn parse_lines<'a, I>(lines: I) -> (Vec<Request>, usize)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut requests = Vec::new();
    let mut skipped = 0usize;
    for (number, line) in lines.into_iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed = split_line(line).and_then(|raw| normalize(&raw));
        match parsed {
            Ok(request) => requests.push(request),
            Err(err) => {
                warn!(line = number + 1, %err, "skipping unparseable log line");
                skipped += 1;
            }
        }
    }
    (requests, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "203.0.113.5 - - [10/Mar/2024:08:00:00 +0000] \
        \"GET /index.html HTTP/1.1\" 200 512 \"-\" \"Mozilla/5.0 (Linux; Android 10) Chrome/90.0\"";

    #[test]
    fn splits_a_combined_log_line() {
        let raw = split_line(LINE).unwrap();
        assert_eq!(raw.source_ip, "203.0.113.5");
        assert_eq!(raw.timestamp, "[10/Mar/2024:08:00:00 +0000]");
        assert_eq!(raw.method, "GET");
        assert_eq!(raw.route, "/index.html");
        assert_eq!(raw.protocol, "HTTP/1.1");
        assert_eq!(raw.status, "200");
        assert_eq!(raw.bytes_sent, "512");
        assert_eq!(raw.referer, "-");
        assert_eq!(raw.user_agent, "Mozilla/5.0 (Linux; Android 10) Chrome/90.0");
    }

    #[test]
    fn rejects_lines_missing_the_request_quotes() {
        assert!(matches!(
            split_line("203.0.113.5 - - [10/Mar/2024:08:00:00 +0000] GET / 200"),
            Err(ParseError::Shape)
        ));
    }

    #[test]
    fn rejects_request_field_with_wrong_arity() {
        let line = "203.0.113.5 - - [10/Mar/2024:08:00:00 +0000] \"GET /\" 200 512 \"-\" \"ua\"";
        assert!(matches!(
            split_line(line),
            Err(ParseError::RequestLine(_))
        ));
    }

    #[test]
    fn parse_lines_skips_bad_lines_and_keeps_good_ones() {
        let (requests, skipped) = parse_lines([LINE, "not a log line", ""]);
        assert_eq!(requests.len(), 1);
        assert_eq!(skipped, 1);
    }
}
