//! Feed documents on disk: one RSS file per sender plus the OPML index.

pub mod opml;
pub mod rss;

use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::config::Config;
use crate::domain::address::feed_file_name;
use crate::error::Result;
use crate::store::repo::MessageRepository;

use self::opml::{FeedDocument, render_subscription_index};
use self::rss::FeedRenderer;

pub const INDEX_FILE: &str = "subscriptions.opml";

/// Joins `path` onto the configured public base URL, or makes it
/// root-relative when there is none.
pub fn public_url(base: Option<&str>, path: &str) -> String {
    let path = path.trim_start_matches('/');
    let Some(base) = base else {
        return format!("/{path}");
    };

    let mut normalized = base.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    match Url::parse(&normalized).and_then(|u| u.join(path)) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{normalized}{path}"),
    }
}

#[derive(Debug, Default)]
pub struct PublishReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<String>,
    pub index: Option<PathBuf>,
}

/// Writes `contents` next to `path` first so readers never see a partial file.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn publish_sender(
    repo: &dyn MessageRepository,
    renderer: &FeedRenderer,
    config: &Config,
    feed_dir: &Path,
    sender: &str,
) -> Result<(PathBuf, FeedDocument)> {
    let messages = repo.get_by_sender(sender, config.max_item_per_feed)?;
    info!("{sender} found entries={}", messages.len());

    let xml = renderer.render_feed(sender, &messages)?;
    let file_name = feed_file_name(sender);
    let path = feed_dir.join(&file_name);
    write_atomic(&path, xml.as_bytes())?;
    info!("{sender} saved feed to {}", path.display());
    Ok((path, FeedDocument { file_name, xml }))
}

/// Renders every sender's feed, then rebuilds the subscription index from
/// the feeds written in this run. A sender that fails is logged, skipped and
/// left out of the index.
pub fn publish_all(repo: &dyn MessageRepository, config: &Config) -> Result<PublishReport> {
    let feed_dir = config.feed_dir();
    fs::create_dir_all(&feed_dir)?;

    let renderer = FeedRenderer::new(config);
    let mut report = PublishReport::default();
    let mut docs = Vec::new();

    for sender in repo.get_all_senders()? {
        match publish_sender(repo, &renderer, config, &feed_dir, &sender) {
            Ok((path, doc)) => {
                report.written.push(path);
                docs.push(doc);
            }
            Err(e) => {
                warn!("{sender}: feed not published: {e}");
                report.failed.push(sender);
            }
        }
    }

    docs.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    let opml = render_subscription_index(&docs, config.server_baseurl.as_deref())?;
    let index = feed_dir.join(INDEX_FILE);
    write_atomic(&index, opml.as_bytes())?;
    info!("subscription index lists {} feeds", docs.len());
    report.index = Some(index);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::NewMessage;
    use crate::store::sqlite::SqliteRepo;
    use chrono::{TimeZone, Utc};

    fn save(repo: &SqliteRepo, source_id: u32, sender: &str) {
        let raw = format!(
            "From: {sender}\r\nSubject: s{source_id}\r\nDate: Tue, 1 Jul 2025 10:00:00 +0000\r\n\r\nbody\r\n"
        );
        repo.save(&NewMessage {
            source_id,
            sender: sender.to_string(),
            receiver: "me@example.org".to_string(),
            subject: format!("s{source_id}"),
            raw_content: raw.into_bytes(),
            timestamp: Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap(),
        })
        .unwrap();
    }

    #[test]
    fn failing_sender_is_left_out_of_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let repo = SqliteRepo::open_in_memory().unwrap();
        save(&repo, 1, "a@b.com");
        save(&repo, 2, "c@d.com");

        let first = publish_all(&repo, &cfg).unwrap();
        assert_eq!(first.written.len(), 2);

        // a directory in the way of the temporary file breaks the next write
        let feed_dir = cfg.feed_dir();
        fs::create_dir(feed_dir.join("a_b_com.xml.tmp")).unwrap();
        fs::write(feed_dir.join("stray.xml"), "<rss><channel><title>stray</title></channel></rss>")
            .unwrap();

        let second = publish_all(&repo, &cfg).unwrap();
        assert_eq!(second.failed, vec!["a@b.com".to_string()]);
        assert_eq!(second.written, vec![feed_dir.join("c_d_com.xml")]);

        let opml = fs::read_to_string(feed_dir.join(INDEX_FILE)).unwrap();
        assert_eq!(opml.matches("<outline ").count(), 1);
        assert!(opml.contains("c_d_com.xml"));
        assert!(!opml.contains("a_b_com"));
        assert!(!opml.contains("stray"));
    }

    #[test]
    fn public_url_variants() {
        assert_eq!(public_url(None, "a.xml"), "/a.xml");
        assert_eq!(public_url(Some("https://x.org"), "a.xml"), "https://x.org/a.xml");
        assert_eq!(
            public_url(Some("https://x.org/feeds"), "/article/a/b"),
            "https://x.org/feeds/article/a/b"
        );
    }
}
