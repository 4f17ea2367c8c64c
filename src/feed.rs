//! Atom and RSS feeds over every published post and album.
//!
//! Content types opt in through [`Feedable`], which projects an item into a
//! flat [`FeedEntry`]. The same entries are written to `feeds/atom.xml`
//! (Atom 1.0) and `feeds/feed.rss` (RSS 2.0), newest entry first, with
//! root-relative links in entry content made absolute so feed readers can
//! follow them.

use crate::config::SiteConfig;
use crate::content::{Album, ContentItem, Post};
use crate::types::SiteUrls;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const FEED_PATH: &str = "feeds/atom.xml";
pub const RSS_PATH: &str = "feeds/feed.rss";

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    /// Canonical URL; doubles as the Atom id.
    pub link: String,
    pub title: String,
    pub summary: String,
    /// HTML.
    pub content: String,
    pub updated: DateTime<Utc>,
}

pub trait Feedable {
    fn feed_entry(&self, base_url: &str) -> FeedEntry;
}

fn entry_for<T: ContentItem>(
    item: &T,
    base_url: &str,
    title: &str,
    summary: &str,
    body: &str,
) -> FeedEntry {
    FeedEntry {
        link: SiteUrls::new(base_url, T::KIND).item(item.slug()),
        title: title.to_string(),
        summary: summary.to_string(),
        content: absolutize(body, base_url),
        updated: item.published_at(),
    }
}

impl Feedable for Post {
    fn feed_entry(&self, base_url: &str) -> FeedEntry {
        entry_for(self, base_url, &self.title, &self.description, &self.body)
    }
}

impl Feedable for Album {
    fn feed_entry(&self, base_url: &str) -> FeedEntry {
        entry_for(self, base_url, &self.title, &self.description, &self.body)
    }
}

/// Rewrite `href="/…"` and `src="/…"` to point at `base_url`.
pub fn absolutize(html: &str, base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    html.replace("href=\"/", &format!("href=\"{base}/"))
        .replace("src=\"/", &format!("src=\"{base}/"))
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn sort_newest_first(entries: &mut [FeedEntry]) {
    entries.sort_by(|a, b| b.updated.cmp(&a.updated).then_with(|| a.link.cmp(&b.link)));
}

/// Render the Atom document. `now` is used for `<updated>` when there are
/// no entries.
pub fn render(
    mut entries: Vec<FeedEntry>,
    site: &SiteConfig,
    now: DateTime<Utc>,
) -> Result<String, FeedError> {
    sort_newest_first(&mut entries);
    let updated = entries.first().map(|e| e.updated).unwrap_or(now);
    let base = site.base_url.trim_end_matches('/');
    let self_link = format!("{base}/{FEED_PATH}");
    let home = format!("{base}/");

    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    w.write_event(Event::Start(
        BytesStart::new("feed").with_attributes([("xmlns", ATOM_NS)]),
    ))?;
    text_element(&mut w, "title", &site.title)?;
    text_element(&mut w, "id", &home)?;
    w.write_event(Event::Empty(
        BytesStart::new("link").with_attributes([("href", self_link.as_str()), ("rel", "self")]),
    ))?;
    w.write_event(Event::Empty(
        BytesStart::new("link").with_attributes([("href", home.as_str()), ("rel", "alternate")]),
    ))?;
    text_element(&mut w, "updated", &timestamp(&updated))?;
    if !site.author_name.is_empty() {
        w.write_event(Event::Start(BytesStart::new("author")))?;
        text_element(&mut w, "name", &site.author_name)?;
        if !site.author_email.is_empty() {
            text_element(&mut w, "email", &site.author_email)?;
        }
        w.write_event(Event::End(BytesEnd::new("author")))?;
    }

    for entry in &entries {
        w.write_event(Event::Start(BytesStart::new("entry")))?;
        text_element(&mut w, "title", &entry.title)?;
        text_element(&mut w, "id", &entry.link)?;
        w.write_event(Event::Empty(
            BytesStart::new("link")
                .with_attributes([("href", entry.link.as_str()), ("rel", "alternate")]),
        ))?;
        text_element(&mut w, "updated", &timestamp(&entry.updated))?;
        if !entry.summary.is_empty() {
            text_element(&mut w, "summary", &entry.summary)?;
        }
        w.write_event(Event::Start(
            BytesStart::new("content").with_attributes([("type", "html")]),
        ))?;
        w.write_event(Event::Text(BytesText::new(&entry.content)))?;
        w.write_event(Event::End(BytesEnd::new("content")))?;
        w.write_event(Event::End(BytesEnd::new("entry")))?;
    }

    w.write_event(Event::End(BytesEnd::new("feed")))?;
    let mut xml = String::from_utf8_lossy(&w.into_inner()).into_owned();
    xml.push('\n');
    Ok(xml)
}

/// Render the RSS 2.0 channel. Entry HTML goes in `content:encoded`, the
/// summary in `description`. `now` stands in for `lastBuildDate` when there
/// are no entries.
pub fn render_rss(
    mut entries: Vec<FeedEntry>,
    site: &SiteConfig,
    now: DateTime<Utc>,
) -> Result<String, FeedError> {
    sort_newest_first(&mut entries);
    let built = entries.first().map(|e| e.updated).unwrap_or(now);
    let base = site.base_url.trim_end_matches('/');
    let self_link = format!("{base}/{RSS_PATH}");
    let home = format!("{base}/");

    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    w.write_event(Event::Start(BytesStart::new("rss").with_attributes([
        ("version", "2.0"),
        ("xmlns:atom", ATOM_NS),
        ("xmlns:content", CONTENT_NS),
    ])))?;
    w.write_event(Event::Start(BytesStart::new("channel")))?;
    text_element(&mut w, "title", &site.title)?;
    text_element(&mut w, "link", &home)?;
    text_element(&mut w, "description", &site.title)?;
    w.write_event(Event::Empty(BytesStart::new("atom:link").with_attributes([
        ("href", self_link.as_str()),
        ("rel", "self"),
        ("type", "application/rss+xml"),
    ])))?;
    text_element(&mut w, "lastBuildDate", &built.to_rfc2822())?;
    if !site.author_email.is_empty() {
        let editor = if site.author_name.is_empty() {
            site.author_email.clone()
        } else {
            format!("{} ({})", site.author_email, site.author_name)
        };
        text_element(&mut w, "managingEditor", &editor)?;
    }

    for entry in &entries {
        w.write_event(Event::Start(BytesStart::new("item")))?;
        text_element(&mut w, "title", &entry.title)?;
        text_element(&mut w, "link", &entry.link)?;
        w.write_event(Event::Start(
            BytesStart::new("guid").with_attributes([("isPermaLink", "true")]),
        ))?;
        w.write_event(Event::Text(BytesText::new(&entry.link)))?;
        w.write_event(Event::End(BytesEnd::new("guid")))?;
        text_element(&mut w, "pubDate", &entry.updated.to_rfc2822())?;
        if !entry.summary.is_empty() {
            text_element(&mut w, "description", &entry.summary)?;
        }
        text_element(&mut w, "content:encoded", &entry.content)?;
        w.write_event(Event::End(BytesEnd::new("item")))?;
    }

    w.write_event(Event::End(BytesEnd::new("channel")))?;
    w.write_event(Event::End(BytesEnd::new("rss")))?;
    let mut xml = String::from_utf8_lossy(&w.into_inner()).into_owned();
    xml.push('\n');
    Ok(xml)
}

fn text_element(w: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<(), FeedError> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Render and write `feeds/atom.xml` and `feeds/feed.rss` under `output`.
pub fn write_feed(
    entries: Vec<FeedEntry>,
    site: &SiteConfig,
    output: &Path,
) -> Result<usize, FeedError> {
    let count = entries.len();
    let now = Utc::now();
    let rss = render_rss(entries.clone(), site, now)?;
    let atom = render(entries, site, now)?;
    for (rel, xml) in [(FEED_PATH, atom), (RSS_PATH, rss)] {
        let path = crate::artifact::output_path(output, rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, xml)?;
    }
    Ok(count)
}
