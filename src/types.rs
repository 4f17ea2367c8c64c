//! Shared types used across all pipeline stages.
//!
//! [`ContentKind`] names the two publishable kinds and carries the few facts
//! every stage needs about them: the directory name used in the source and
//! output trees, and the URL segment used in canonical links.

use serde::Serialize;
use std::fmt;

/// A publishable content kind.
///
/// The lowercase name doubles as the source directory (`content/posts/`),
/// the output directory (`dist/posts/`) and the JSON:API resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Posts,
    Galleries,
}

impl ContentKind {
    pub const ALL: [ContentKind; 2] = [ContentKind::Posts, ContentKind::Galleries];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Posts => "posts",
            ContentKind::Galleries => "galleries",
        }
    }

    /// Path segment of the public site where this kind is served.
    pub fn segment(self) -> &'static str {
        match self {
            ContentKind::Posts => "blog",
            ContentKind::Galleries => "px",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical public URLs for one content kind.
///
/// ```text
/// index   https://example.com/blog
/// page n  https://example.com/blog/page/n
/// item    https://example.com/blog/<slug>
/// ```
#[derive(Debug, Clone)]
pub struct SiteUrls {
    root: String,
}

impl SiteUrls {
    pub fn new(base_url: &str, kind: ContentKind) -> Self {
        Self {
            root: format!("{}/{}", base_url.trim_end_matches('/'), kind.segment()),
        }
    }

    pub fn index(&self) -> String {
        self.root.clone()
    }

    pub fn page(&self, number: usize) -> String {
        format!("{}/page/{}", self.root, number)
    }

    pub fn item(&self, slug: &str) -> String {
        format!("{}/{}", self.root, slug)
    }
}
