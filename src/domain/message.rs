use chrono::{DateTime, Utc};

pub type MessageId = i64;
pub type SourceId = u32;

/// A message as persisted by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub source_id: SourceId,
    pub sender: String,
    pub receiver: String,
    /// Raw header value, possibly RFC 2047 encoded.
    pub subject: String,
    pub raw_content: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// A message ready for insertion; the store assigns `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub source_id: SourceId,
    pub sender: String,
    pub receiver: String,
    pub subject: String,
    pub raw_content: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Per-sender aggregate used by the global listing.
#[derive(Debug, Clone, PartialEq)]
pub struct SenderSummary {
    pub sender: String,
    pub count: usize,
    pub latest: DateTime<Utc>,
}
