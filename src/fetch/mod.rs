//! One fetch run: pick a window, search the mailbox, store what is new.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{info, warn};

use crate::domain::message::{NewMessage, SourceId};
use crate::error::Result;
use crate::mail::extract::extract;
use crate::mail::imap_client::Mailbox;
use crate::store::repo::{MessageRepository, SaveOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchWindow {
    /// Empty store: look 30 days back to populate the feeds.
    Backfill,
    /// Steady state: the last day only.
    Incremental,
}

impl FetchWindow {
    pub fn days(self) -> i64 {
        match self {
            FetchWindow::Backfill => 30,
            FetchWindow::Incremental => 1,
        }
    }

    pub fn since(self, today: NaiveDate) -> NaiveDate {
        today - Duration::days(self.days())
    }
}

pub fn determine_window(repo: &dyn MessageRepository) -> Result<FetchWindow> {
    if repo.count()? == 0 {
        Ok(FetchWindow::Backfill)
    } else {
        Ok(FetchWindow::Incremental)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub window: FetchWindow,
    pub found: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub last_source_id_before: SourceId,
    pub last_source_id_after: SourceId,
}

impl FetchReport {
    pub fn has_new_messages(&self) -> bool {
        self.last_source_id_before != self.last_source_id_after
    }
}

/// Builds the row for a freshly fetched message. Unparsable addresses get
/// placeholders and an unparsable date falls back to `fetched_at`.
pub fn new_message_from_raw(
    source_id: SourceId,
    raw: Vec<u8>,
    fetched_at: DateTime<Utc>,
) -> Result<NewMessage> {
    let extracted = extract(&raw)?;
    let timestamp = extracted
        .date()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(fetched_at);

    Ok(NewMessage {
        source_id,
        sender: extracted.sender(),
        receiver: extracted.receiver(),
        subject: extracted.subject_header.clone().unwrap_or_default(),
        raw_content: raw,
        timestamp,
    })
}

/// Runs one fetch cycle. Any mailbox failure aborts the run; a message that
/// cannot be parsed is skipped.
pub fn run_fetch<M: Mailbox + ?Sized>(
    repo: &dyn MessageRepository,
    mailbox: &mut M,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<FetchReport> {
    let last_source_id_before = repo.last_source_id()?;
    let window = determine_window(repo)?;

    let ids = mailbox.search_since(window.since(today))?;
    info!("found {} messages in the last {} days", ids.len(), window.days());

    let mut report = FetchReport {
        window,
        found: ids.len(),
        inserted: 0,
        duplicates: 0,
        skipped: 0,
        last_source_id_before,
        last_source_id_after: last_source_id_before,
    };

    for (index, id) in ids.iter().copied().enumerate() {
        info!("processing message {} of {}", index + 1, ids.len());
        let raw = mailbox.fetch_raw(id)?;

        let message = match new_message_from_raw(id, raw, now) {
            Ok(m) => m,
            Err(e) => {
                warn!("skipping message {id}: {e}");
                report.skipped += 1;
                continue;
            }
        };
        info!("message {id} from {}, subject {:?}", message.sender, message.subject);

        match repo.save(&message)? {
            SaveOutcome::Inserted => report.inserted += 1,
            SaveOutcome::Duplicate => report.duplicates += 1,
        }
    }

    report.last_source_id_after = repo.last_source_id()?;
    info!(
        "fetch done: {} new, {} duplicate, {} skipped",
        report.inserted, report.duplicates, report.skipped
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::sqlite::SqliteRepo;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct FakeMailbox {
        messages: BTreeMap<SourceId, Vec<u8>>,
        searched: Vec<NaiveDate>,
        fail_fetch: bool,
    }

    impl Mailbox for FakeMailbox {
        fn search_since(&mut self, since: NaiveDate) -> Result<Vec<SourceId>> {
            self.searched.push(since);
            Ok(self.messages.keys().copied().collect())
        }

        fn fetch_raw(&mut self, id: SourceId) -> Result<Vec<u8>> {
            if self.fail_fetch {
                return Err(Error::Connectivity("connection reset".into()));
            }
            Ok(self.messages[&id].clone())
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 31).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 31, 12, 0, 0).unwrap()
    }

    fn raw(from: &str, subject: &str, date: Option<&str>) -> Vec<u8> {
        let mut s = format!("From: {from}\r\nTo: Me <Me@Example.org>\r\nSubject: {subject}\r\n");
        if let Some(d) = date {
            s.push_str(&format!("Date: {d}\r\n"));
        }
        s.push_str("\r\nhello\r\n");
        s.into_bytes()
    }

    #[test]
    fn empty_store_backfills_thirty_days() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        assert_eq!(determine_window(&repo).unwrap(), FetchWindow::Backfill);

        let mut mailbox = FakeMailbox::default();
        run_fetch(&repo, &mut mailbox, today(), now()).unwrap();
        assert_eq!(mailbox.searched, vec![NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()]);
    }

    #[test]
    fn stores_new_messages_then_polls_one_day() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let mut mailbox = FakeMailbox::default();
        mailbox.messages.insert(
            1,
            raw("News <News@Example.com>", "first", Some("Tue, 29 Jul 2025 08:00:00 +0000")),
        );
        mailbox.messages.insert(
            2,
            raw("News <News@Example.com>", "second", Some("Wed, 30 Jul 2025 08:00:00 +0000")),
        );

        let report = run_fetch(&repo, &mut mailbox, today(), now()).unwrap();
        assert_eq!(report.window, FetchWindow::Backfill);
        assert_eq!(report.inserted, 2);
        assert!(report.has_new_messages());
        assert_eq!(report.last_source_id_after, 2);

        let stored = repo.get_by_sender("news@example.com", 10).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].receiver, "me@example.org");
        assert_eq!(stored[0].subject, "second");

        let again = run_fetch(&repo, &mut mailbox, today(), now()).unwrap();
        assert_eq!(again.window, FetchWindow::Incremental);
        assert_eq!(again.duplicates, 2);
        assert_eq!(again.inserted, 0);
        assert!(!again.has_new_messages());
        assert_eq!(mailbox.searched[1], NaiveDate::from_ymd_opt(2025, 7, 30).unwrap());
    }

    #[test]
    fn missing_date_defaults_to_fetch_time() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let mut mailbox = FakeMailbox::default();
        mailbox.messages.insert(4, raw("undisclosed", "no date", None));

        let report = run_fetch(&repo, &mut mailbox, today(), now()).unwrap();
        assert_eq!(report.inserted, 1);

        let stored = repo.get_by_sender("unknown@email.com", 10).unwrap();
        assert_eq!(stored[0].timestamp, now());
    }

    #[test]
    fn unreadable_date_defaults_to_fetch_time() {
        let message = new_message_from_raw(
            1,
            b"From: a@b.com\r\nSubject: x\r\nDate: not a date\r\n\r\nbody".to_vec(),
            now(),
        )
        .unwrap();
        assert_eq!(message.timestamp, now());
    }

    #[test]
    fn mailbox_failure_aborts_the_run() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        let mut mailbox = FakeMailbox {
            fail_fetch: true,
            ..Default::default()
        };
        mailbox.messages.insert(1, raw("a@b.com", "x", None));

        let err = run_fetch(&repo, &mut mailbox, today(), now()).unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));
        assert_eq!(repo.count().unwrap(), 0);
    }
}
