use chrono::{DateTime, FixedOffset, Utc};
use log::warn;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Write;

use crate::config::Config;
use crate::domain::address::{extract_domain, sanitize_feed_name};
use crate::domain::message::StoredMessage;
use crate::error::{Error, Result};
use crate::feed::public_url;
use crate::mail::extract::extract;

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";

#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub guid: String,
    pub author_email: String,
    pub author_name: String,
    pub description: String,
    pub published: DateTime<FixedOffset>,
}

pub struct FeedRenderer<'a> {
    config: &'a Config,
}

impl<'a> FeedRenderer<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Renders the RSS 2.0 document for `sender`. `messages` are expected
    /// newest first, as returned by the store.
    pub fn render_feed(&self, sender: &str, messages: &[StoredMessage]) -> Result<String> {
        let site = site_link(sender);
        let mut title = None;
        let mut entries = Vec::with_capacity(messages.len());

        for message in messages {
            match self.entry(sender, &site, message) {
                Ok((entry, display_name)) => {
                    if title.is_none() {
                        title = display_name;
                    }
                    entries.push(entry);
                }
                Err(e) => warn!("{sender}: skipping message {}: {e}", message.source_id),
            }
        }

        let channel = Channel {
            title: title.unwrap_or_else(|| sender.to_string()),
            link: site,
            description: format!("RSS feed for {sender}"),
            pub_date: entries.iter().map(|e| e.published).max(),
        };

        write_rss(&channel, &entries, Utc::now()).map_err(|e| Error::Render {
            sender: sender.to_string(),
            reason: e.to_string(),
        })
    }

    fn entry(
        &self,
        sender: &str,
        site: &str,
        message: &StoredMessage,
    ) -> Result<(FeedEntry, Option<String>)> {
        let extracted = extract(&message.raw_content)?;
        let guid = extracted.guid()?;

        let link = if self.config.enable_internal_reader {
            public_url(
                self.config.server_baseurl.as_deref(),
                &format!("article/{}/{guid}", sanitize_feed_name(sender)),
            )
        } else {
            site.to_string()
        };

        let entry = FeedEntry {
            title: extracted.subject.clone(),
            link,
            guid,
            author_email: sender.to_string(),
            author_name: extracted.author_name(),
            description: extracted.body(),
            published: extracted
                .date()
                .unwrap_or_else(|| message.timestamp.fixed_offset()),
        };
        Ok((entry, extracted.from_name))
    }
}

/// Guess at the sender's website; not verified.
pub fn site_link(sender: &str) -> String {
    format!("https://{}", extract_domain(sender).unwrap_or(sender))
}

struct Channel {
    title: String,
    link: String,
    description: String,
    pub_date: Option<DateTime<FixedOffset>>,
}

fn text_element<W: Write>(w: &mut Writer<W>, name: &str, text: &str) -> anyhow::Result<()> {
    w.create_element(name)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

fn write_rss(
    channel: &Channel,
    entries: &[FeedEntry],
    built: DateTime<Utc>,
) -> anyhow::Result<String> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    w.write_event(Event::Start(BytesStart::new("rss").with_attributes([
        ("xmlns:atom", ATOM_NS),
        ("xmlns:content", CONTENT_NS),
        ("version", "2.0"),
    ])))?;
    w.write_event(Event::Start(BytesStart::new("channel")))?;

    text_element(&mut w, "title", &channel.title)?;
    text_element(&mut w, "link", &channel.link)?;
    text_element(&mut w, "description", &channel.description)?;
    text_element(&mut w, "docs", "http://www.rssboard.org/rss-specification")?;
    text_element(&mut w, "generator", "mailfeed")?;
    text_element(&mut w, "lastBuildDate", &built.to_rfc2822())?;
    if let Some(pub_date) = channel.pub_date {
        text_element(&mut w, "pubDate", &pub_date.to_rfc2822())?;
    }

    for entry in entries {
        w.write_event(Event::Start(BytesStart::new("item")))?;
        text_element(&mut w, "title", &entry.title)?;
        text_element(&mut w, "link", &entry.link)?;
        text_element(&mut w, "description", &entry.description)?;
        text_element(
            &mut w,
            "author",
            &format!("{} ({})", entry.author_email, entry.author_name),
        )?;
        w.create_element("guid")
            .with_attribute(("isPermaLink", "false"))
            .write_text_content(BytesText::new(&entry.guid))?;
        text_element(&mut w, "pubDate", &entry.published.to_rfc2822())?;
        w.write_event(Event::End(BytesEnd::new("item")))?;
    }

    w.write_event(Event::End(BytesEnd::new("channel")))?;
    w.write_event(Event::End(BytesEnd::new("rss")))?;

    Ok(String::from_utf8(w.into_inner())?)
}
