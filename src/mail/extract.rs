//! Content extraction from raw RFC 822 messages.

use chrono::{DateTime, FixedOffset};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use quick_xml::escape::escape;

use crate::domain::address::{UNKNOWN_RECEIVER, UNKNOWN_SENDER, extract_email_address};
use crate::error::{Error, Result};
use crate::mail::decoders::{
    cleanse_content, decode_mime_words, decode_payload, parse_date, raw_header,
};
use crate::mail::guid::guid_from_headers;

/// The parts of a message the feed and reader care about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedMessage {
    /// Decoded subject, empty when the header is missing.
    pub subject: String,
    pub subject_header: Option<String>,
    pub date_header: Option<String>,
    pub from_header: Option<String>,
    pub to_header: Option<String>,
    /// Decoded display name of the first `From` address.
    pub from_name: Option<String>,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
}

impl ExtractedMessage {
    /// HTML when available, otherwise the plain text escaped inside `<pre>`.
    pub fn body(&self) -> String {
        if let Some(html) = &self.body_html {
            return html.clone();
        }
        match &self.body_text {
            Some(text) => format!(
                "<pre style=\"white-space: pre-wrap\">{}</pre>",
                escape(text.as_str())
            ),
            None => String::new(),
        }
    }

    pub fn date(&self) -> Option<DateTime<FixedOffset>> {
        self.date_header.as_deref().and_then(parse_date)
    }

    pub fn sender(&self) -> String {
        extract_email_address(self.from_header.as_deref().unwrap_or(""), UNKNOWN_SENDER)
    }

    pub fn receiver(&self) -> String {
        extract_email_address(self.to_header.as_deref().unwrap_or(""), UNKNOWN_RECEIVER)
    }

    /// Display name of the sender, falling back to the bare address.
    pub fn author_name(&self) -> String {
        self.from_name.clone().unwrap_or_else(|| self.sender())
    }

    pub fn guid(&self) -> Result<String> {
        guid_from_headers(
            self.subject_header.as_deref(),
            self.date_header.as_deref(),
            self.from_header.as_deref(),
        )
    }
}

pub fn extract(raw: &[u8]) -> Result<ExtractedMessage> {
    let parsed = mailparse::parse_mail(raw).map_err(|e| Error::Parse(e.to_string()))?;

    let subject_header = raw_header(&parsed.headers, "Subject");
    let subject = subject_header
        .as_deref()
        .map(|s| cleanse_content(&decode_mime_words(s.as_bytes())))
        .unwrap_or_default();

    let from_name = parsed
        .headers
        .get_first_header("From")
        .and_then(|h| mailparse::addrparse_header(h).ok())
        .and_then(|list| list.extract_single_info())
        .and_then(|info| info.display_name)
        .map(|name| cleanse_content(name.trim()))
        .filter(|name| !name.is_empty());

    let mut bodies = BodyCandidates::default();
    bodies.walk(&parsed);

    Ok(ExtractedMessage {
        subject,
        subject_header,
        date_header: raw_header(&parsed.headers, "Date"),
        from_header: raw_header(&parsed.headers, "From"),
        to_header: raw_header(&parsed.headers, "To"),
        from_name,
        body_html: bodies.html,
        body_text: bodies.text,
    })
}

#[derive(Default)]
struct BodyCandidates {
    html: Option<String>,
    text: Option<String>,
}

impl BodyCandidates {
    fn walk(&mut self, part: &ParsedMail) {
        if part.get_content_disposition().disposition == DispositionType::Attachment {
            return;
        }

        if part.subparts.is_empty() {
            self.offer(part);
        }
        for sub in &part.subparts {
            self.walk(sub);
        }
    }

    fn offer(&mut self, part: &ParsedMail) {
        let mime = part.ctype.mimetype.to_ascii_lowercase();
        let wanted = match mime.as_str() {
            "text/html" => self.html.is_none(),
            "text/plain" => self.html.is_none() && self.text.is_none(),
            _ => false,
        };
        if !wanted {
            return;
        }

        let decoded = match decode_payload(part) {
            Ok(text) => cleanse_content(&text),
            Err(e) => {
                log::warn!("skipping {mime} part: {e}");
                return;
            }
        };

        if mime == "text/html" {
            self.html = Some(decoded);
        } else {
            self.text = Some(decoded);
        }
    }
}
