use anyhow::Result;
use chrono::{Local, Utc};
use log::{error, info};
use std::{
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use crate::config::Config;
use crate::feed::{INDEX_FILE, PublishReport, publish_all};
use crate::fetch::{FetchReport, run_fetch};
use crate::mail::imap_client::{ImapMailbox, Mailbox};
use crate::store::repo::MessageRepository;

#[derive(Debug)]
pub struct CycleOutcome {
    pub fetch: FetchReport,
    /// `None` when nothing changed and the index already exists.
    pub publish: Option<PublishReport>,
}

/// One poll: fetch from a freshly connected mailbox, then republish the
/// feeds if the store moved on.
pub fn run_cycle<M, F>(repo: &dyn MessageRepository, config: &Config, connect: F) -> Result<CycleOutcome>
where
    M: Mailbox,
    F: FnOnce() -> crate::error::Result<M>,
{
    let mut mailbox = connect()?;
    let fetched = run_fetch(repo, &mut mailbox, Local::now().date_naive(), Utc::now());
    mailbox.logout();
    let fetch = fetched?;

    let index_exists = config.feed_dir().join(INDEX_FILE).exists();
    if !fetch.has_new_messages() && index_exists {
        info!("no new messages, feeds left as they are");
        return Ok(CycleOutcome { fetch, publish: None });
    }

    let publish = publish_all(repo, config)?;
    info!(
        "published {} feeds ({} failed)",
        publish.written.len(),
        publish.failed.len()
    );
    Ok(CycleOutcome {
        fetch,
        publish: Some(publish),
    })
}

/// Sleeps for `total`, waking early once `running` is cleared.
fn wait(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(500)));
    }
}

/// Polls the mailbox every `poll_interval` until Ctrl-C. Failed cycles are
/// logged and retried on the next tick.
pub fn run_daemon(repo: &dyn MessageRepository, config: &Config) -> Result<()> {
    let creds = config.credentials()?;

    let running = Arc::new(AtomicBool::new(true));
    let r2 = running.clone();
    ctrlc::set_handler(move || {
        r2.store(false, Ordering::SeqCst);
    })?;

    info!(
        "polling {} every {}s",
        creds.server,
        config.poll_interval().as_secs()
    );
    while running.load(Ordering::SeqCst) {
        if let Err(e) = run_cycle(repo, config, || ImapMailbox::connect(&creds)) {
            error!("poll failed: {e:#}");
        }
        wait(&running, config.poll_interval());
    }

    info!("poller stopped");
    Ok(())
}
