//! Minimal HTML views over the store: one article, or message listings.

use chrono::{DateTime, Utc};
use log::debug;
use quick_xml::escape::escape;
use std::fmt::Write as _;

use crate::domain::address::{guess_sender, sanitize_feed_name};
use crate::domain::message::{SenderSummary, StoredMessage};
use crate::error::Result;
use crate::feed::public_url;
use crate::mail::extract::extract;
use crate::store::repo::MessageRepository;

pub enum Listing<'a> {
    /// Every sender with its message count and latest date.
    Senders(&'a [SenderSummary]),
    /// One sender's messages, newest first.
    Sender {
        sender: &'a str,
        messages: &'a [StoredMessage],
    },
}

/// Known senders whose sanitized name is `feed_name`, then the heuristic
/// reconstruction when it names nobody we know.
pub fn candidate_senders(repo: &dyn MessageRepository, feed_name: &str) -> Result<Vec<String>> {
    let mut candidates: Vec<String> = repo
        .get_all_senders()?
        .into_iter()
        .filter(|s| sanitize_feed_name(s) == feed_name)
        .collect();
    candidates.sort();

    if let Some(guess) = guess_sender(feed_name)
        && !candidates.contains(&guess)
    {
        candidates.push(guess);
    }
    Ok(candidates)
}

/// Resolves `feed_name` + `guid` to a stored message. The GUID settles
/// which candidate sender was meant.
pub fn find_article(
    repo: &dyn MessageRepository,
    feed_name: &str,
    guid: &str,
) -> Result<Option<StoredMessage>> {
    for sender in candidate_senders(repo, feed_name)? {
        if let Some(message) = repo.get_by_guid(&sender, guid)? {
            return Ok(Some(message));
        }
    }
    debug!("no message {guid} for feed {feed_name}");
    Ok(None)
}

fn format_date(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        escape(title)
    )
}

pub fn render_message(message: &StoredMessage) -> String {
    let (subject, author, date, body) = match extract(&message.raw_content) {
        Ok(m) => {
            let date = m
                .date()
                .map(|d| d.to_rfc2822())
                .unwrap_or_else(|| format_date(&message.timestamp));
            let author = format!("{} &lt;{}&gt;", escape(&m.author_name()), escape(&message.sender));
            (m.subject.clone(), author, date, m.body())
        }
        Err(e) => {
            debug!("cannot extract message {}: {e}", message.source_id);
            (
                message.subject.clone(),
                escape(&message.sender).into_owned(),
                format_date(&message.timestamp),
                String::new(),
            )
        }
    };

    let feed_name = sanitize_feed_name(&message.sender);
    let body = format!(
        "<p><a href=\"/article/{feed}\">&larr; {sender}</a></p>\n\
         <article>\n<h1>{subject}</h1>\n\
         <p class=\"meta\">From: {author}<br>Date: {date}</p>\n\
         <div class=\"content\">\n{body}\n</div>\n</article>",
        feed = escape(&feed_name),
        sender = escape(&message.sender),
        subject = escape(&subject),
        date = escape(&date),
    );
    page(&subject, &body)
}

pub fn render_article(
    repo: &dyn MessageRepository,
    feed_name: &str,
    guid: &str,
) -> Result<Option<String>> {
    Ok(find_article(repo, feed_name, guid)?.map(|m| render_message(&m)))
}

pub fn render_listing(listing: &Listing) -> String {
    match listing {
        Listing::Senders(summaries) => {
            let mut body = String::from("<h1>Feeds</h1>\n<ul>\n");
            for s in summaries.iter() {
                let feed = sanitize_feed_name(&s.sender);
                let _ = writeln!(
                    body,
                    "<li><a href=\"/article/{}\">{}</a> ({} messages, latest {}) \
                     <a href=\"/{}.xml\">rss</a></li>",
                    escape(&feed),
                    escape(&s.sender),
                    s.count,
                    format_date(&s.latest),
                    escape(&feed),
                );
            }
            body.push_str("</ul>\n<p><a href=\"/subscriptions.opml\">OPML</a></p>");
            page("Feeds", &body)
        }
        Listing::Sender { sender, messages } => {
            let feed = sanitize_feed_name(sender);
            let mut body = format!(
                "<p><a href=\"/article\">&larr; all feeds</a></p>\n<h1>{}</h1>\n<ul>\n",
                escape(*sender)
            );
            for message in messages.iter() {
                let (subject, guid) = match extract(&message.raw_content) {
                    Ok(m) => (m.subject.clone(), m.guid().ok()),
                    Err(_) => (message.subject.clone(), None),
                };
                let subject = if subject.is_empty() { "(no subject)".to_string() } else { subject };
                let title = match guid {
                    Some(guid) => format!(
                        "<a href=\"/article/{}/{}\">{}</a>",
                        escape(&feed),
                        escape(&guid),
                        escape(&subject)
                    ),
                    None => escape(&subject).into_owned(),
                };
                let _ = writeln!(body, "<li>{title} <small>{}</small></li>", format_date(&message.timestamp));
            }
            body.push_str("</ul>");
            page(sender, &body)
        }
    }
}

pub fn render_global_listing(repo: &dyn MessageRepository) -> Result<String> {
    let summaries = repo.sender_summaries()?;
    Ok(render_listing(&Listing::Senders(&summaries)))
}

/// `None` when the feed name matches no stored message.
pub fn render_sender_listing(
    repo: &dyn MessageRepository,
    feed_name: &str,
    limit: usize,
) -> Result<Option<String>> {
    for sender in candidate_senders(repo, feed_name)? {
        let messages = repo.get_by_sender(&sender, limit)?;
        if !messages.is_empty() {
            return Ok(Some(render_listing(&Listing::Sender {
                sender: &sender,
                messages: &messages,
            })));
        }
    }
    Ok(None)
}

/// Diagnostic lines for a sender's stored messages: subject, date, GUID and
/// reader URL per message. A message that cannot be processed gets an error
/// line instead.
pub fn describe_sender(
    repo: &dyn MessageRepository,
    sender: &str,
    limit: usize,
    base_url: Option<&str>,
) -> Result<Vec<String>> {
    let feed_name = sanitize_feed_name(sender);
    let mut lines = Vec::new();
    for m in repo.get_by_sender(sender, limit)? {
        let described = extract(&m.raw_content).and_then(|e| e.guid().map(|guid| (e, guid)));
        match described {
            Ok((e, guid)) => {
                lines.push(format!("#{} {}", m.source_id, e.subject));
                lines.push(format!("    date: {}", m.timestamp.to_rfc2822()));
                lines.push(format!("    guid: {guid}"));
                lines.push(format!(
                    "    url:  {}",
                    public_url(base_url, &format!("article/{feed_name}/{guid}"))
                ));
            }
            Err(e) => lines.push(format!("#{} error processing message: {e}", m.source_id)),
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::NewMessage;
    use crate::mail::guid::derive_guid;
    use crate::store::sqlite::SqliteRepo;
    use chrono::TimeZone;

    const DATE: &str = "Tue, 1 Jul 2025 10:00:00 +0000";

    fn save(repo: &SqliteRepo, source_id: u32, sender: &str, subject: &str) {
        let raw = format!("From: {sender}\r\nSubject: {subject}\r\nDate: {DATE}\r\n\r\n<p>body</p>\r\n");
        repo.save(&NewMessage {
            source_id,
            sender: sender.to_string(),
            receiver: "me@example.org".to_string(),
            subject: subject.to_string(),
            raw_content: raw.into_bytes(),
            timestamp: Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap(),
        })
        .unwrap();
    }

    #[test]
    fn underscored_sender_is_found_through_known_senders() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        save(&repo, 1, "first_last@example.com", "Hi <there>");

        let guid = derive_guid("Hi <there>", DATE, "first_last@example.com");
        let html = render_article(&repo, "first_last_example_com", &guid)
            .unwrap()
            .unwrap();
        assert!(html.contains("<h1>Hi &lt;there&gt;</h1>"));
        assert!(html.contains("first_last@example.com"));
    }

    #[test]
    fn guid_disambiguates_colliding_feed_names() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        save(&repo, 1, "a.b@c.com", "dotted");
        save(&repo, 2, "a_b@c.com", "underscored");

        let guid = derive_guid("underscored", DATE, "a_b@c.com");
        let found = find_article(&repo, "a_b_c_com", &guid).unwrap().unwrap();
        assert_eq!(found.source_id, 2);
    }

    #[test]
    fn unknown_article_is_absent() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        save(&repo, 1, "a@b.com", "x");
        assert!(render_article(&repo, "a_b_com", "deadbeef").unwrap().is_none());
        assert!(render_article(&repo, "nobody", "deadbeef").unwrap().is_none());
    }

    #[test]
    fn describe_keeps_going_past_a_broken_message() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        save(&repo, 1, "a@b.com", "good");
        repo.save(&NewMessage {
            source_id: 2,
            sender: "a@b.com".to_string(),
            receiver: "me@example.org".to_string(),
            subject: "no date".to_string(),
            raw_content: b"From: a@b.com\r\nSubject: no date\r\n\r\nx\r\n".to_vec(),
            timestamp: Utc.with_ymd_and_hms(2025, 7, 2, 10, 0, 0).unwrap(),
        })
        .unwrap();

        let lines = describe_sender(&repo, "a@b.com", 10, Some("https://x.org")).unwrap();
        assert_eq!(lines[0], "#2 error processing message: message has no Date header");
        assert_eq!(lines[1], "#1 good");
        let guid = derive_guid("good", DATE, "a@b.com");
        assert!(lines.contains(&format!("    url:  https://x.org/article/a_b_com/{guid}")));
    }

    #[test]
    fn listings_link_to_feeds_and_articles() {
        let repo = SqliteRepo::open_in_memory().unwrap();
        save(&repo, 1, "a@b.com", "one");
        save(&repo, 2, "a@b.com", "two");

        let global = render_global_listing(&repo).unwrap();
        assert!(global.contains("<a href=\"/article/a_b_com\">a@b.com</a> (2 messages"));
        assert!(global.contains("/a_b_com.xml"));

        let listing = render_sender_listing(&repo, "a_b_com", 10).unwrap().unwrap();
        let guid = derive_guid("one", DATE, "a@b.com");
        assert!(listing.contains(&format!("/article/a_b_com/{guid}")));

        assert!(render_sender_listing(&repo, "x_y_com", 10).unwrap().is_none());
    }
}
