use crate::domain::message::{NewMessage, SenderSummary, SourceId, StoredMessage};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    /// The `source_id` was already stored; nothing was written.
    Duplicate,
}

pub trait MessageRepository: Send + Sync {
    fn save(&self, message: &NewMessage) -> Result<SaveOutcome>;

    /// Newest first, at most `limit` rows.
    fn get_by_sender(&self, sender: &str, limit: usize) -> Result<Vec<StoredMessage>>;
    fn get_all_senders(&self) -> Result<Vec<String>>;

    /// Scans the sender's messages, recomputing each GUID.
    fn get_by_guid(&self, sender: &str, guid: &str) -> Result<Option<StoredMessage>>;

    fn count(&self) -> Result<usize>;

    /// Source id of the most recently dated message, 0 when empty.
    fn last_source_id(&self) -> Result<SourceId>;

    fn sender_summaries(&self) -> Result<Vec<SenderSummary>>;
}
