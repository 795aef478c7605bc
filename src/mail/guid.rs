//! Content-derived message identity.
//!
//! The GUID is the MD5 of the raw `Subject`, `Date` and `From` header
//! values concatenated in that order. It is recomputed on every use, so it
//! must only ever depend on bytes kept in the store.

use crate::error::{Error, Result};
use crate::mail::decoders::raw_header;

pub fn derive_guid(subject: &str, date: &str, from: &str) -> String {
    let mut ctx = md5::Context::new();
    ctx.consume(subject.as_bytes());
    ctx.consume(date.as_bytes());
    ctx.consume(from.as_bytes());
    format!("{:x}", ctx.compute())
}

pub fn guid_from_headers(
    subject: Option<&str>,
    date: Option<&str>,
    from: Option<&str>,
) -> Result<String> {
    let subject = subject.ok_or(Error::MissingHeader("Subject"))?;
    let date = date.ok_or(Error::MissingHeader("Date"))?;
    let from = from.ok_or(Error::MissingHeader("From"))?;
    Ok(derive_guid(subject, date, from))
}

/// GUID of a stored raw message; only the header block is parsed.
pub fn guid_for_message(raw: &[u8]) -> Result<String> {
    let (headers, _body_offset) =
        mailparse::parse_headers(raw).map_err(|e| Error::Parse(e.to_string()))?;
    guid_from_headers(
        raw_header(&headers, "Subject").as_deref(),
        raw_header(&headers, "Date").as_deref(),
        raw_header(&headers, "From").as_deref(),
    )
}
