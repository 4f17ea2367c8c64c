//! Collecting, filtering and ordering content items.
//!
//! The collector fully drains a walker's channel before doing anything
//! else: every aggregate stage (individual writes, sort, pagination,
//! archives) runs over the materialized list, never over a partly filled
//! one.
//!
//! Visibility: an item is published when its slug is non-empty and it is
//! not a draft (unless drafts are enabled). The first item seen with a
//! given slug wins; later duplicates are dropped.

use crate::artifact::{self, ArtifactError};
use crate::content::{ContentItem, is_safe_slug};
use crate::scan::Ingest;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct Visibility {
    pub drafts: bool,
}

impl Visibility {
    pub fn admits(&self, slug: &str, draft: bool) -> bool {
        !slug.is_empty() && (self.drafts || !draft)
    }
}

/// Outcome counters for one drain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectStats {
    pub accepted: usize,
    /// Parse or validation failures.
    pub failed: usize,
    /// Filtered out by [`Visibility`].
    pub hidden: usize,
    pub duplicates: usize,
    /// The traversal itself aborted.
    pub fatal: bool,
}

/// Drain `ingest` into a list, logging every dropped item.
pub fn gather<T: ContentItem>(ingest: Ingest<T>, visibility: Visibility) -> (Vec<T>, CollectStats) {
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    let mut stats = CollectStats::default();

    ingest.drain(|record| match record {
        Ok(item) => {
            if !visibility.admits(item.slug(), item.is_draft()) {
                tracing::debug!(kind = %T::KIND, slug = item.slug(), draft = item.is_draft(), "not published");
                stats.hidden += 1;
            } else if !seen.insert(item.slug().to_string()) {
                tracing::warn!(kind = %T::KIND, slug = item.slug(), "duplicate slug, keeping the first");
                stats.duplicates += 1;
            } else {
                stats.accepted += 1;
                items.push(item);
            }
        }
        Err(err) if err.is_fatal() => {
            tracing::error!(kind = %T::KIND, error = %err, "traversal aborted");
            stats.fatal = true;
        }
        Err(err) => {
            tracing::warn!(kind = %T::KIND, error = %err, "skipping item");
            stats.failed += 1;
        }
    });

    (items, stats)
}

/// Write `<kind>/<slug>.json` (plus assets) for every item, in parallel.
///
/// Failures are logged and counted; the items stay in the collection.
pub fn write_items<T: ContentItem>(items: &[T], output: &Path) -> usize {
    items
        .par_iter()
        .map(|item| match write_item(item, output) {
            Ok(()) => 0,
            Err(err) => {
                tracing::error!(kind = %T::KIND, slug = item.slug(), error = %err, "failed to write item");
                1
            }
        })
        .sum()
}

fn write_item<T: ContentItem>(item: &T, output: &Path) -> Result<(), ArtifactError> {
    if !is_safe_slug(item.slug()) {
        return Err(ArtifactError::UnsafeName {
            name: item.slug().to_string(),
        });
    }
    let path = output
        .join(T::KIND.as_str())
        .join(format!("{}.json", item.slug()));
    let doc = item.document().map_err(|source| ArtifactError::Json {
        path: path.clone(),
        source,
    })?;
    artifact::write_document(&path, &doc)?;
    for asset in item.assets() {
        artifact::copy_asset(&asset.source, &artifact::output_path(output, &asset.target))?;
    }
    Ok(())
}

/// Reverse-chronological, immutable list of published items.
#[derive(Debug)]
pub struct Collection<T> {
    items: Vec<T>,
}

impl<T: ContentItem> Collection<T> {
    /// Sort newest first; equal timestamps fall back to slug order.
    pub fn new(mut items: Vec<T>) -> Self {
        items.sort_by(|a, b| {
            b.published_at()
                .cmp(&a.published_at())
                .then_with(|| a.slug().cmp(b.slug()))
        });
        Self { items }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Post;
    use crate::scan::spawn_posts;
    use crate::test_helpers::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn visibility_predicate() {
        let published_only = Visibility { drafts: false };
        let with_drafts = Visibility { drafts: true };
        assert!(published_only.admits("a", false));
        assert!(!published_only.admits("a", true));
        assert!(with_drafts.admits("a", true));
        assert!(!with_drafts.admits("", false));
    }

    #[test]
    fn drafts_hidden_by_default() {
        let tmp = setup_fixtures();
        let (posts, stats) = gather(spawn_posts(&tmp.path().join("posts")), Visibility::default());
        assert_eq!(posts.len(), 3);
        assert_eq!(stats.hidden, 1);
        assert!(posts.iter().all(|p| p.slug != "wip"));
    }

    #[test]
    fn drafts_included_when_enabled() {
        let tmp = setup_fixtures();
        let (posts, stats) = gather(
            spawn_posts(&tmp.path().join("posts")),
            Visibility { drafts: true },
        );
        assert_eq!(posts.len(), 4);
        assert_eq!(stats.hidden, 0);
    }

    #[test]
    fn empty_slug_is_not_published() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "a.md", "---\npublished-at: 2023-01-01\n---\n");
        let (posts, stats) = gather(spawn_posts(tmp.path()), Visibility { drafts: true });
        assert!(posts.is_empty());
        assert_eq!(stats.hidden, 1);
    }

    #[test]
    fn first_duplicate_slug_wins() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "a.md", &post_md("same", "2023-01-01"));
        write_file(tmp.path(), "b.md", &post_md("same", "2023-05-05"));
        let (posts, stats) = gather(spawn_posts(tmp.path()), Visibility::default());
        assert_eq!(posts.len(), 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(posts[0].published_at.format("%m").to_string(), "01");
    }

    #[test]
    fn fatal_error_is_flagged() {
        let tmp = TempDir::new().unwrap();
        let (posts, stats) = gather(spawn_posts(&tmp.path().join("missing")), Visibility::default());
        assert!(posts.is_empty());
        assert!(stats.fatal);
    }

    #[test]
    fn collection_sorted_newest_first_with_slug_tiebreak() {
        let posts = vec![
            post("b", "2023-01-01"),
            post("c", "2023-03-01"),
            post("a", "2023-01-01"),
            post("d", "2022-12-31"),
        ];
        let collection = Collection::new(posts);
        let slugs: Vec<&str> = collection.items().iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, ["c", "a", "b", "d"]);
        for pair in collection.items().windows(2) {
            assert!(pair[0].published_at >= pair[1].published_at);
        }
    }

    #[test]
    fn write_items_writes_one_document_per_item() {
        let tmp = TempDir::new().unwrap();
        let items: Vec<Post> = (0..8).map(|i| post(&format!("p{i}"), "2023-01-01")).collect();
        assert_eq!(write_items(&items, tmp.path()), 0);
        for i in 0..8 {
            let path = tmp.path().join(format!("posts/p{i}.json"));
            let doc: serde_json::Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
            assert_eq!(doc["data"]["id"], format!("p{i}"));
            assert_eq!(doc["data"]["type"], "posts");
        }
    }

    #[test]
    fn write_failure_is_counted_not_fatal() {
        let tmp = TempDir::new().unwrap();
        // a file where the kind directory should be
        fs::write(tmp.path().join("posts"), "blocker").unwrap();
        let items = vec![post("a", "2023-01-01"), post("b", "2023-01-02")];
        assert_eq!(write_items(&items, tmp.path()), 2);
    }

    #[test]
    fn traversing_slugs_are_rejected_at_parse() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "a.md", &post_md("../../escaped", "2023-01-01"));
        write_file(tmp.path(), "b.md", &post_md("page/1", "2023-01-02"));
        write_file(tmp.path(), "c.md", &post_md("fine", "2023-01-03"));
        let (posts, stats) = gather(spawn_posts(tmp.path()), Visibility::default());
        assert_eq!(posts.len(), 1);
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn unsafe_slug_never_leaves_the_output_tree() {
        let root = TempDir::new().unwrap();
        let out = root.path().join("dist");
        let items = vec![
            post("../../escaped", "2023-01-01"),
            post("page/1", "2023-01-02"),
            post("ok", "2023-01-03"),
        ];
        assert_eq!(write_items(&items, &out), 2);
        assert!(out.join("posts/ok.json").is_file());
        assert!(!out.join("posts/page").exists());
        assert_eq!(count_files(root.path()), 1);
    }

    #[test]
    fn album_assets_copied_next_to_document() {
        let tmp = setup_fixtures();
        let out = TempDir::new().unwrap();
        let (albums, _) = gather(
            crate::scan::spawn_galleries(&tmp.path().join("galleries")),
            Visibility::default(),
        );
        assert_eq!(write_items(&albums, out.path()), 0);
        assert!(out.path().join("galleries/iceland.json").is_file());
        assert_eq!(
            fs::read_to_string(out.path().join("galleries/iceland/dawn.jpg")).unwrap(),
            "not really a jpeg\n"
        );
    }
}
