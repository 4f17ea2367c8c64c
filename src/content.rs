//! Content parsing: front matter + markdown body → typed content items.
//!
//! Every source file has the same shape: a YAML front-matter block fenced by
//! `---` lines, followed by a markdown body:
//!
//! ```text
//! ---
//! slug: one-week-off-grid
//! title: One Week Off-Grid
//! published-at: 2018-06-12
//! description: I turned off my computer and phone for a week.
//! draft: false
//! ---
//! The markdown body.
//! ```
//!
//! [`parse`] splits and decodes a raw file into a [`Parsed`] record. The YAML
//! decode and the markdown render are pure functions of their input; the
//! typed constructors ([`Post::from_parsed`], [`Album::from_parsed`],
//! [`Photo::from_parsed`]) apply per-kind defaults and validation.
//!
//! Anything other than exactly three `---`-separated sections (empty
//! preamble, front matter, body) is a hard error for that one file.

use crate::jsonapi::{Document, Identifier, Linkage, Resource};
use crate::types::ContentKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use pulldown_cmark::{Options, Parser, html as md_html};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

const DELIMITER: &str = "---";

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("file is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("splitting on `---` gave {0} sections, expected 3")]
    Sections(usize),
    #[error("text before the opening `---`")]
    LeadingText,
    #[error("front matter: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid timestamp {0:?} (expected RFC 3339 or YYYY-MM-DD)")]
    Timestamp(String),
    #[error("missing required field `{0}`")]
    Missing(&'static str),
    #[error("slug {0:?} is not a single path segment")]
    UnsafeSlug(String),
}

/// A slug names one file under its kind directory, so it must be a single
/// path segment that does not start with a dot.
pub fn is_safe_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('.')
        && !slug.chars().any(|c| c == '/' || c == '\\' || c.is_control())
}

fn checked_slug(slug: String) -> Result<String, ParseError> {
    if slug.is_empty() || is_safe_slug(&slug) {
        Ok(slug)
    } else {
        Err(ParseError::UnsafeSlug(slug))
    }
}

/// Raw front-matter fields. Every key is optional at this level; the typed
/// constructors decide which ones are required.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FrontMatter {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub draft: bool,
    #[serde(rename = "published-at")]
    pub published_at: Option<String>,
    /// Photos only: when the picture was taken.
    pub taken: Option<String>,
    /// Photos only: asset filename relative to the album directory.
    pub image: Option<String>,
}

/// A split and decoded source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub front: FrontMatter,
    /// Body rendered to HTML.
    pub body: String,
}

/// Split a raw file into front matter and body, decode the YAML and render
/// the markdown.
pub fn parse(raw: &[u8]) -> Result<Parsed, ParseError> {
    let text = std::str::from_utf8(raw)?;
    let (front, body) = split_sections(text)?;
    Ok(Parsed {
        front: parse_front_matter(front)?,
        body: render_markdown(body),
    })
}

/// Split on `---` delimiter lines into `(front_matter, body)`.
pub fn split_sections(text: &str) -> Result<(&str, &str), ParseError> {
    let mut delimiters = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            delimiters.push((offset, offset + line.len()));
        }
        offset += line.len();
    }

    if delimiters.len() != 2 {
        return Err(ParseError::Sections(delimiters.len() + 1));
    }
    let (open_start, open_end) = delimiters[0];
    let (close_start, close_end) = delimiters[1];
    if !text[..open_start].trim().is_empty() {
        return Err(ParseError::LeadingText);
    }
    Ok((&text[open_end..close_start], &text[close_end..]))
}

pub fn parse_front_matter(yaml: &str) -> Result<FrontMatter, ParseError> {
    if yaml.trim().is_empty() {
        return Ok(FrontMatter::default());
    }
    Ok(serde_yaml::from_str(yaml)?)
}

/// Markdown → HTML. Tables, footnotes and strikethrough are enabled.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut html = String::with_capacity(markdown.len() * 3 / 2);
    md_html::push_html(&mut html, parser);
    html
}

/// Accepts RFC 3339 (`2018-06-12T10:00:00-05:00`), `YYYY-MM-DD HH:MM:SS`
/// (taken as UTC) and bare dates (midnight UTC).
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ParseError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    Err(ParseError::Timestamp(value.to_string()))
}

/// Common surface of everything that lands in an ordered collection.
pub trait ContentItem: Send + Sync {
    const KIND: ContentKind;

    fn slug(&self) -> &str;
    fn published_at(&self) -> DateTime<Utc>;
    fn is_draft(&self) -> bool;

    /// The resource as it appears in pages and archive buckets.
    fn resource(&self) -> Result<Resource, serde_json::Error>;

    /// The standalone document written to `<kind>/<slug>.json`.
    fn document(&self) -> Result<Document, serde_json::Error> {
        Ok(Document::one(self.resource()?))
    }

    /// Files copied verbatim next to the item's document.
    fn assets(&self) -> Vec<Asset> {
        Vec::new()
    }
}

/// A file copied as-is into the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub source: PathBuf,
    /// Output-relative destination, `/`-separated.
    pub target: String,
}

// ============================================================================
// Posts
// ============================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Post {
    #[serde(skip)]
    pub slug: String,
    pub title: String,
    pub description: String,
    pub draft: bool,
    #[serde(rename = "published-at")]
    pub published_at: DateTime<Utc>,
    pub body: String,
}

impl Post {
    pub fn from_parsed(parsed: Parsed) -> Result<Self, ParseError> {
        let front = parsed.front;
        let published_at = front
            .published_at
            .as_deref()
            .ok_or(ParseError::Missing("published-at"))
            .and_then(parse_timestamp)?;
        Ok(Self {
            slug: checked_slug(front.slug)?,
            title: front.title,
            description: front.description,
            draft: front.draft,
            published_at,
            body: parsed.body,
        })
    }
}

impl ContentItem for Post {
    const KIND: ContentKind = ContentKind::Posts;

    fn slug(&self) -> &str {
        &self.slug
    }

    fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    fn is_draft(&self) -> bool {
        self.draft
    }

    fn resource(&self) -> Result<Resource, serde_json::Error> {
        Resource::new(Self::KIND.as_str(), &self.slug, self)
    }
}

// ============================================================================
// Galleries
// ============================================================================

/// A gallery album: a directory holding `<dir>/<dir>.md` plus one markdown
/// file per photo. The album owns its photos.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Album {
    #[serde(skip)]
    pub slug: String,
    pub title: String,
    pub description: String,
    pub draft: bool,
    #[serde(rename = "published-at")]
    pub published_at: DateTime<Utc>,
    pub body: String,
    #[serde(skip)]
    pub photos: Vec<Photo>,
}

impl Album {
    pub fn from_parsed(parsed: Parsed) -> Result<Self, ParseError> {
        let post = Post::from_parsed(parsed)?;
        Ok(Self {
            slug: post.slug,
            title: post.title,
            description: post.description,
            draft: post.draft,
            published_at: post.published_at,
            body: post.body,
            photos: Vec::new(),
        })
    }

    /// Attach photos, ordered by `taken` then slug.
    pub fn with_photos(mut self, mut photos: Vec<Photo>) -> Self {
        photos.sort_by(|a, b| a.taken.cmp(&b.taken).then_with(|| a.slug.cmp(&b.slug)));
        self.photos = photos;
        self
    }
}

impl ContentItem for Album {
    const KIND: ContentKind = ContentKind::Galleries;

    fn slug(&self) -> &str {
        &self.slug
    }

    fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    fn is_draft(&self) -> bool {
        self.draft
    }

    fn resource(&self) -> Result<Resource, serde_json::Error> {
        let photos = self
            .photos
            .iter()
            .map(|p| Identifier {
                id: p.slug.clone(),
                kind: Photo::TYPE.to_string(),
            })
            .collect();
        Ok(Resource::new(Self::KIND.as_str(), &self.slug, self)?
            .relate("photos", Linkage::Many(photos)))
    }

    fn document(&self) -> Result<Document, serde_json::Error> {
        let included = self
            .photos
            .iter()
            .map(Photo::resource)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Document::one(self.resource()?).with_included(included))
    }

    fn assets(&self) -> Vec<Asset> {
        self.photos
            .iter()
            .filter_map(|p| {
                Some(Asset {
                    source: p.source_image.clone()?,
                    target: p.image.clone()?,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Photo {
    #[serde(skip)]
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    pub taken: DateTime<Utc>,
    /// Output-relative path of the image, e.g. `galleries/iceland/dawn.jpg`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Slug of the owning album (back-reference only).
    #[serde(skip)]
    pub gallery: String,
    #[serde(skip)]
    pub source_image: Option<PathBuf>,
}

impl Photo {
    pub const TYPE: &'static str = "photos";

    /// `stem` is the photo's markdown file stem, used when the front matter
    /// has no slug. `taken` falls back to the album's publish time.
    pub fn from_parsed(
        parsed: Parsed,
        stem: &str,
        album: &Album,
        source_image: Option<PathBuf>,
    ) -> Result<Self, ParseError> {
        let front = parsed.front;
        let slug = if front.slug.is_empty() {
            stem.to_string()
        } else {
            checked_slug(front.slug)?
        };
        let taken = match front.taken.as_deref() {
            Some(t) => parse_timestamp(t)?,
            None => album.published_at,
        };
        let image = source_image
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|name| {
                format!(
                    "{}/{}/{}",
                    ContentKind::Galleries.as_str(),
                    album.slug,
                    name.to_string_lossy()
                )
            });
        Ok(Self {
            slug,
            title: (!front.title.is_empty()).then_some(front.title),
            description: parsed.body,
            taken,
            image,
            gallery: album.slug.clone(),
            source_image,
        })
    }

    pub fn resource(&self) -> Result<Resource, serde_json::Error> {
        Ok(Resource::new(Self::TYPE, &self.slug, self)?.relate(
            "gallery",
            Linkage::One(Identifier {
                id: self.gallery.clone(),
                kind: ContentKind::Galleries.as_str().to_string(),
            }),
        ))
    }
}
