use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{Connection, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::domain::message::{NewMessage, SenderSummary, SourceId, StoredMessage};
use crate::error::Result;
use crate::mail::guid::guid_for_message;
use crate::store::repo::{MessageRepository, SaveOutcome};

pub struct SqliteRepo {
    conn: Mutex<Connection>,
}

const COLUMNS: &str = "id, source_id, sender, receiver, subject, content, timestamp";

impl SqliteRepo {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.migrate()?;
        Ok(repo)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // rows are append-only, so a panicked holder cannot leave them torn
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS emails (
                id          INTEGER PRIMARY KEY,
                source_id   INTEGER NOT NULL UNIQUE,
                sender      TEXT NOT NULL,
                receiver    TEXT NOT NULL,
                subject     TEXT NOT NULL,
                content     BLOB NOT NULL,
                timestamp   INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS emails_sender_ts ON emails (sender, timestamp);
            "#,
        )?;
        Ok(())
    }
}

fn epoch_to_utc(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn row_to_message(r: &Row) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: r.get(0)?,
        source_id: r.get(1)?,
        sender: r.get(2)?,
        receiver: r.get(3)?,
        subject: r.get(4)?,
        raw_content: r.get(5)?,
        timestamp: epoch_to_utc(r.get(6)?),
    })
}

impl MessageRepository for SqliteRepo {
    fn save(&self, message: &NewMessage) -> Result<SaveOutcome> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            r#"
            INSERT INTO emails (source_id, sender, receiver, subject, content, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(source_id) DO NOTHING
            "#,
            params![
                message.source_id,
                message.sender,
                message.receiver,
                message.subject,
                message.raw_content,
                message.timestamp.timestamp(),
            ],
        )?;
        tx.commit()?;

        if inserted == 0 {
            info!(
                "message with source id {} already exists, discarding",
                message.source_id
            );
            Ok(SaveOutcome::Duplicate)
        } else {
            debug!("stored message {} from {}", message.source_id, message.sender);
            Ok(SaveOutcome::Inserted)
        }
    }

    fn get_by_sender(&self, sender: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM emails WHERE sender = ?1 \
             ORDER BY timestamp DESC, source_id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![sender, limit as i64], row_to_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get_all_senders(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT sender FROM emails")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    fn get_by_guid(&self, sender: &str, guid: &str) -> Result<Option<StoredMessage>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM emails WHERE sender = ?1 ORDER BY timestamp DESC, source_id DESC"
        ))?;
        let mut rows = stmt.query(params![sender])?;

        while let Some(r) = rows.next()? {
            let message = row_to_message(r)?;
            match guid_for_message(&message.raw_content) {
                Ok(candidate) if candidate == guid => return Ok(Some(message)),
                Ok(_) => {}
                Err(e) => debug!("no guid for message {}: {e}", message.source_id),
            }
        }
        Ok(None)
    }

    fn count(&self) -> Result<usize> {
        let n: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM emails", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    fn last_source_id(&self) -> Result<SourceId> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT source_id FROM emails ORDER BY timestamp DESC, id DESC LIMIT 1")?;
        let mut rows = stmt.query([])?;
        if let Some(r) = rows.next()? {
            Ok(r.get(0)?)
        } else {
            Ok(0)
        }
    }

    fn sender_summaries(&self) -> Result<Vec<SenderSummary>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT sender, COUNT(*), MAX(timestamp)
            FROM emails
            GROUP BY sender
            ORDER BY MAX(timestamp) DESC, sender
            "#,
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(SenderSummary {
                sender: r.get(0)?,
                count: r.get::<_, i64>(1)? as usize,
                latest: epoch_to_utc(r.get(2)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
