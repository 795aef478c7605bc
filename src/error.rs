use std::result;
use thiserror::Error;

/// Errors raised by the fetch/store/render pipeline.
///
/// A duplicate `source_id` is not an error (see
/// [`SaveOutcome::Duplicate`](crate::store::repo::SaveOutcome)), and lookup
/// misses are reported as `None`.
#[derive(Debug, Error)]
pub enum Error {
    /// Mailbox unreachable, TLS failure or rejected login. Fatal to the
    /// current run only.
    #[error("cannot reach mailbox: {0}")]
    Connectivity(String),

    /// Malformed message. Isolated to that message.
    #[error("cannot parse message: {0}")]
    Parse(String),

    /// One of the GUID headers is absent.
    #[error("message has no {0} header")]
    MissingHeader(&'static str),

    /// Feed or index build failure. Isolated to one sender.
    #[error("cannot render feed for {sender}: {reason}")]
    Render { sender: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<imap::error::Error> for Error {
    fn from(err: imap::error::Error) -> Self {
        Error::Connectivity(err.to_string())
    }
}

impl From<native_tls::Error> for Error {
    fn from(err: native_tls::Error) -> Self {
        Error::Connectivity(format!("TLS error: {err}"))
    }
}

pub type Result<T> = result::Result<T, Error>;
