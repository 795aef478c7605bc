use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use mailparse::{MailHeader, MailHeaderMap, ParsedMail};

use crate::error::{Error, Result};

/// Decodes RFC 2047 encoded-words into a Unicode string.
pub fn decode_mime_words(raw: &[u8]) -> String {
    // mailparse expects a full "Key: value" header line
    let mut line = b"X: ".to_vec();
    line.extend_from_slice(raw);
    line.extend_from_slice(b"\r\n");

    match mailparse::parse_header(&line) {
        Ok((h, _idx)) => h.get_value(),
        Err(_) => String::from_utf8_lossy(raw).into_owned(),
    }
}

/// Raw (undecoded) value of the first header called `name`.
pub(crate) fn raw_header(headers: &[MailHeader], name: &str) -> Option<String> {
    headers
        .get_first_header(name)
        .map(|h| String::from_utf8_lossy(h.get_value_raw()).into_owned())
}

/// Strips control characters that are not allowed in XML text, keeping tab,
/// newline and carriage-return.
pub fn cleanse_content(s: &str) -> String {
    s.chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r') || !(c.is_control() || c == '\u{FFFE}' || c == '\u{FFFF}'))
        .collect()
}

/// Decoded text of a single (non-multipart) part.
///
/// A declared charset is honoured; without one the payload is read as UTF-8.
/// Undecodable bytes are replaced rather than rejected.
pub fn decode_payload(part: &ParsedMail) -> Result<String> {
    let declares_charset = part
        .headers
        .get_first_value("Content-Type")
        .map(|ct| ct.to_ascii_lowercase().contains("charset"))
        .unwrap_or(false);

    if declares_charset && let Ok(body) = part.get_body() {
        return Ok(body);
    }

    let raw = part
        .get_body_raw()
        .map_err(|e| Error::Parse(format!("undecodable {} payload: {e}", part.ctype.mimetype)))?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Parses a `Date` header. RFC 2822 keeps the sender's offset; anything
/// looser goes through mailparse, which assumes UTC when no zone is given.
/// The loose path needs at least a time of day, since mailparse answers
/// epoch 0 for text it cannot read.
pub fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt);
    }
    if !value.contains(':') || !value.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    mailparse::dateparse(value)
        .ok()
        .filter(|&epoch| epoch != 0)
        .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single())
        .map(|dt| dt.fixed_offset())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanse_drops_nul_and_vertical_tab_only() {
        let dirty = "a\u{0}b\u{b}c\td\ne\rf";
        assert_eq!(cleanse_content(dirty), "abc\td\ne\rf");
    }

    #[test]
    fn decodes_multiple_encoded_words() {
        let raw = b"=?UTF-8?B?SGVsbG8g?= =?ISO-8859-1?Q?W=F6rld?=";
        assert_eq!(decode_mime_words(raw), "Hello W\u{f6}rld");
    }

    #[test]
    fn parses_dates_with_and_without_offsets() {
        let dt = parse_date("Tue, 1 Jul 2025 10:52:37 +0200").unwrap();
        assert_eq!(dt.offset().local_minus_utc(), 7200);

        let naive = parse_date("1 Jul 2025 10:52:37").unwrap();
        assert_eq!(naive.offset().local_minus_utc(), 0);

        assert!(parse_date("not a date").is_none());
        assert!(parse_date("hello").is_none());
        assert!(parse_date("sometime: soon").is_none());
        assert!(parse_date("").is_none());
    }
}
