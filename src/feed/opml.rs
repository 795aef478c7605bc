use chrono::Utc;
use log::warn;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::feed::public_url;

/// A rendered feed file as read back from the feed directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedDocument {
    pub file_name: String,
    pub xml: String,
}

#[derive(Debug, Deserialize)]
struct RssHead {
    channel: ChannelHead,
}

#[derive(Debug, Deserialize)]
struct ChannelHead {
    title: String,
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outline {
    pub title: String,
    pub xml_url: String,
    pub html_url: String,
}

fn outline_for(doc: &FeedDocument, base_url: Option<&str>) -> Result<Outline> {
    let head: RssHead =
        quick_xml::de::from_str(&doc.xml).map_err(|e| Error::Parse(e.to_string()))?;
    Ok(Outline {
        title: head.channel.title,
        xml_url: public_url(base_url, &doc.file_name),
        html_url: head.channel.link.unwrap_or_default(),
    })
}

/// Builds the OPML index; documents that do not parse are left out.
pub fn render_subscription_index(documents: &[FeedDocument], base_url: Option<&str>) -> Result<String> {
    let outlines: Vec<Outline> = documents
        .iter()
        .filter_map(|doc| match outline_for(doc, base_url) {
            Ok(outline) => Some(outline),
            Err(e) => {
                warn!("leaving {} out of the index: {e}", doc.file_name);
                None
            }
        })
        .collect();

    write_opml(&outlines).map_err(|e| Error::Render {
        sender: "subscription index".to_string(),
        reason: e.to_string(),
    })
}

fn write_opml(outlines: &[Outline]) -> anyhow::Result<String> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    w.write_event(Event::Start(
        BytesStart::new("opml").with_attributes([("version", "2.0")]),
    ))?;

    w.write_event(Event::Start(BytesStart::new("head")))?;
    w.create_element("title")
        .write_text_content(BytesText::new("Email feeds"))?;
    w.create_element("dateCreated")
        .write_text_content(BytesText::new(&Utc::now().to_rfc2822()))?;
    w.write_event(Event::End(BytesEnd::new("head")))?;

    w.write_event(Event::Start(BytesStart::new("body")))?;
    for o in outlines {
        w.create_element("outline")
            .with_attributes([
                ("type", "rss"),
                ("text", o.title.as_str()),
                ("title", o.title.as_str()),
                ("xmlUrl", o.xml_url.as_str()),
                ("htmlUrl", o.html_url.as_str()),
            ])
            .write_empty()?;
    }
    w.write_event(Event::End(BytesEnd::new("body")))?;
    w.write_event(Event::End(BytesEnd::new("opml")))?;

    Ok(String::from_utf8(w.into_inner())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::feed::rss::FeedRenderer;

    fn doc(file_name: &str, xml: String) -> FeedDocument {
        FeedDocument {
            file_name: file_name.to_string(),
            xml,
        }
    }

    #[test]
    fn one_outline_per_feed_and_broken_feeds_skipped() {
        let cfg = Config::default();
        let renderer = FeedRenderer::new(&cfg);
        let docs = vec![
            doc("a_b_com.xml", renderer.render_feed("a@b.com", &[]).unwrap()),
            doc("broken.xml", "<rss><channel><title>oops".to_string()),
            doc("c_d_org.xml", renderer.render_feed("c@d.org", &[]).unwrap()),
        ];

        let opml = render_subscription_index(&docs, Some("https://feeds.example.org/")).unwrap();

        assert_eq!(opml.matches("<outline ").count(), 2);
        assert!(opml.contains(r#"xmlUrl="https://feeds.example.org/a_b_com.xml""#));
        assert!(opml.contains(r#"htmlUrl="https://d.org""#));
        assert!(opml.contains(r#"title="c@d.org""#));
        assert!(!opml.contains("broken"));
    }

    #[test]
    fn feed_titles_are_escaped_in_attributes() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Tom &amp; "Jerry"</title><link>https://x.org</link></channel></rss>"#;
        let opml = render_subscription_index(&[doc("x.xml", xml.to_string())], None).unwrap();
        assert!(opml.contains(r#"xmlUrl="/x.xml""#));
        assert!(opml.contains("Tom &amp; &quot;Jerry&quot;"));
    }
}
