//! Sender address normalization and the sanitized feed-name mapping.

use regex::Regex;
use std::sync::LazyLock;

static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w.-]+@[\w.-]+").expect("valid address regex"));

static DOMAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([\w.-]+)").expect("valid domain regex"));

pub const UNKNOWN_SENDER: &str = "unknown@email.com";
pub const UNKNOWN_RECEIVER: &str = "you@email.com";

/// First address-looking token in a header value, lowercased.
pub fn find_email_address(text: &str) -> Option<String> {
    ADDRESS_RE.find(text).map(|m| m.as_str().to_lowercase())
}

pub fn extract_email_address(text: &str, default: &str) -> String {
    find_email_address(text).unwrap_or_else(|| default.to_string())
}

pub fn extract_domain(address: &str) -> Option<&str> {
    DOMAIN_RE
        .captures(address)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// `a.b@c.com` -> `a_b_c_com`. Safe as a file stem and a URL segment.
pub fn sanitize_feed_name(sender: &str) -> String {
    sender.replace(['@', '.'], "_")
}

pub fn feed_file_name(sender: &str) -> String {
    format!("{}.xml", sanitize_feed_name(sender))
}

/// Best-effort inverse of [`sanitize_feed_name`]: the first segment is the
/// local part, the rest joined by dots is the domain. Wrong whenever the
/// local part or the domain held an underscore.
pub fn guess_sender(feed_name: &str) -> Option<String> {
    let mut segments = feed_name.split('_').filter(|s| !s.is_empty());
    let local = segments.next()?;
    let domain: Vec<&str> = segments.collect();
    if domain.is_empty() {
        return None;
    }
    Some(format!("{local}@{}", domain.join(".")))
}
