use chrono::NaiveDate;
use log::{debug, info};
use native_tls::{TlsConnector, TlsStream};
use std::net::TcpStream;

use crate::config::MailboxCredentials;
use crate::domain::message::SourceId;
use crate::error::{Error, Result};

/// The mail source the fetch controller pulls from.
pub trait Mailbox {
    /// Identifiers of every message dated on or after `since`.
    fn search_since(&mut self, since: NaiveDate) -> Result<Vec<SourceId>>;

    /// Complete RFC 822 bytes of one message.
    fn fetch_raw(&mut self, id: SourceId) -> Result<Vec<u8>>;

    /// Ends the session. Failures here are not worth reporting.
    fn logout(&mut self) {}
}

pub struct ImapMailbox {
    session: imap::Session<TlsStream<TcpStream>>,
}

impl ImapMailbox {
    /// Opens a TLS session, logs in and selects the configured mailbox.
    pub fn connect(creds: &MailboxCredentials) -> Result<Self> {
        let server = creds.server.as_str();
        let tcp = TcpStream::connect((server, creds.port))
            .map_err(|e| Error::Connectivity(format!("{server}:{}: {e}", creds.port)))?;
        tcp.set_read_timeout(Some(creds.timeout))?;
        tcp.set_write_timeout(Some(creds.timeout))?;

        let tls = TlsConnector::builder().build()?;
        let stream = tls
            .connect(server, tcp)
            .map_err(|e| Error::Connectivity(format!("TLS handshake with {server} failed: {e}")))?;

        let mut client = imap::Client::new(stream);
        client.read_greeting()?;

        let mut session = client
            .login(&creds.user, &creds.password)
            .map_err(|(e, _client)| Error::Connectivity(format!("login failed: {e}")))?;

        let mailbox = session.select(&creds.mailbox)?;
        info!(
            "connected to {server}, selected {} ({} messages)",
            creds.mailbox, mailbox.exists
        );

        Ok(Self { session })
    }
}

/// IMAP `SEARCH` date syntax, e.g. `01-Jul-2025`.
pub fn since_query(since: NaiveDate) -> String {
    format!("SINCE {}", since.format("%d-%b-%Y"))
}

impl Mailbox for ImapMailbox {
    fn search_since(&mut self, since: NaiveDate) -> Result<Vec<SourceId>> {
        let query = since_query(since);
        debug!("IMAP search: {query}");
        let mut ids: Vec<SourceId> = self.session.search(&query)?.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn fetch_raw(&mut self, id: SourceId) -> Result<Vec<u8>> {
        // PEEK leaves the \Seen flag alone
        let fetches = self.session.fetch(id.to_string(), "BODY.PEEK[]")?;
        fetches
            .iter()
            .next()
            .and_then(|f| f.body())
            .map(|b| b.to_vec())
            .ok_or_else(|| Error::Connectivity(format!("message {id} returned no body")))
    }

    fn logout(&mut self) {
        if let Err(e) = self.session.logout() {
            debug!("IMAP logout failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_since_query_like_imap_expects() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        assert_eq!(since_query(date), "SINCE 01-Jul-2025");
    }
}
