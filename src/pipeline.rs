//! Build orchestration.
//!
//! For each content kind: walk → collect → write items → sort → paginate →
//! archive. Then the feed over every kind, then the manifest over the whole
//! output tree.
//!
//! Per-item and per-file failures are logged where they happen and counted
//! in the [`BuildReport`]; only failing to create the output directory
//! aborts a build. A kind whose source directory does not exist is skipped.

use crate::archive;
use crate::collect::{self, Collection, Visibility};
use crate::config::PublishConfig;
use crate::content::ContentItem;
use crate::feed::{self, FeedEntry, Feedable};
use crate::manifest::Manifest;
use crate::paginate;
use crate::scan::{self, Ingest};
use crate::types::{ContentKind, SiteUrls};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("cannot create output directory {path}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    pub drafts: bool,
}

/// What happened to one content kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindReport {
    pub kind: ContentKind,
    /// The source directory was absent; nothing else is set.
    pub missing: bool,
    pub published: usize,
    pub pages: usize,
    pub archives: usize,
    pub hidden: usize,
    pub invalid: usize,
    pub duplicates: usize,
    pub fatal: bool,
    pub write_failures: usize,
}

impl KindReport {
    fn missing(kind: ContentKind) -> Self {
        Self {
            kind,
            missing: true,
            published: 0,
            pages: 0,
            archives: 0,
            hidden: 0,
            invalid: 0,
            duplicates: 0,
            fatal: false,
            write_failures: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub kinds: Vec<KindReport>,
    /// `None` when the feed could not be written.
    pub feed_entries: Option<usize>,
    /// `None` when the manifest could not be written.
    pub manifest_entries: Option<usize>,
}

impl BuildReport {
    pub fn failures(&self) -> usize {
        let kinds: usize = self
            .kinds
            .iter()
            .map(|k| k.invalid + k.write_failures + usize::from(k.fatal))
            .sum();
        kinds + usize::from(self.feed_entries.is_none()) + usize::from(self.manifest_entries.is_none())
    }
}

fn kind_dir(source: &Path, kind: ContentKind) -> Option<PathBuf> {
    let dir = source.join(kind.as_str());
    if dir.is_dir() {
        Some(dir)
    } else {
        tracing::info!(%kind, dir = %dir.display(), "no source directory, skipping");
        None
    }
}

/// Run the full build from `source` into `output`.
pub fn build(
    source: &Path,
    output: &Path,
    config: &PublishConfig,
    options: &BuildOptions,
) -> Result<BuildReport, BuildError> {
    fs::create_dir_all(output).map_err(|source| BuildError::Output {
        path: output.to_path_buf(),
        source,
    })?;
    let visibility = Visibility {
        drafts: options.drafts,
    };

    let mut feed_entries = Vec::new();
    let mut kinds = Vec::with_capacity(ContentKind::ALL.len());
    for kind in ContentKind::ALL {
        let Some(dir) = kind_dir(source, kind) else {
            kinds.push(KindReport::missing(kind));
            continue;
        };
        let report = match kind {
            ContentKind::Posts => {
                build_kind(scan::spawn_posts(&dir), output, config, visibility, &mut feed_entries)
            }
            ContentKind::Galleries => build_kind(
                scan::spawn_galleries(&dir),
                output,
                config,
                visibility,
                &mut feed_entries,
            ),
        };
        kinds.push(report);
    }

    let feed_entries = match feed::write_feed(feed_entries, &config.site, output) {
        Ok(n) => Some(n),
        Err(err) => {
            tracing::error!(error = %err, "failed to write feed");
            None
        }
    };

    let manifest_entries = match write_manifest(output, &config.sync.prefix) {
        Ok(manifest) => Some(manifest.len()),
        Err(err) => {
            tracing::error!(error = %err, "failed to write manifest");
            None
        }
    };

    Ok(BuildReport {
        kinds,
        feed_entries,
        manifest_entries,
    })
}

/// Build one kind from an already started walk. Feed entries for every
/// published item are appended to `feed`.
pub fn build_kind<T: ContentItem + Feedable>(
    ingest: Ingest<T>,
    output: &Path,
    config: &PublishConfig,
    visibility: Visibility,
    feed: &mut Vec<FeedEntry>,
) -> KindReport {
    let (items, stats) = collect::gather(ingest, visibility);
    let mut write_failures = collect::write_items(&items, output);
    let collection = Collection::new(items);

    let urls = SiteUrls::new(&config.site.base_url, T::KIND);
    let pages = paginate::paginate(collection.items(), config.kind(T::KIND).page_size, &urls);
    write_failures += paginate::write_pages(&pages, output);

    let buckets = archive::bucket(collection.items());
    write_failures += archive::write_archives(&buckets, output);

    feed.extend(
        collection
            .items()
            .iter()
            .map(|item| item.feed_entry(&config.site.base_url)),
    );

    tracing::info!(
        kind = %T::KIND,
        published = collection.len(),
        pages = pages.len(),
        archives = buckets.len(),
        "built"
    );
    KindReport {
        kind: T::KIND,
        missing: false,
        published: collection.len(),
        pages: pages.len(),
        archives: buckets.len(),
        hidden: stats.hidden,
        invalid: stats.failed,
        duplicates: stats.duplicates,
        fatal: stats.fatal,
        write_failures,
    }
}

/// Regenerate `manifest.json` for `output`.
pub fn write_manifest(output: &Path, prefix: &str) -> Result<Manifest, crate::manifest::ManifestError> {
    let manifest = Manifest::generate(output, prefix)?;
    let path = manifest.save(output)?;
    tracing::info!(entries = manifest.len(), path = %path.display(), "manifest written");
    Ok(manifest)
}

/// Walk and parse everything without writing. Page and archive counts are
/// what a build would produce.
pub fn check(source: &Path, config: &PublishConfig, options: &BuildOptions) -> Vec<KindReport> {
    let visibility = Visibility {
        drafts: options.drafts,
    };
    ContentKind::ALL
        .into_iter()
        .map(|kind| match kind_dir(source, kind) {
            None => KindReport::missing(kind),
            Some(dir) => match kind {
                ContentKind::Posts => check_kind(scan::spawn_posts(&dir), config, visibility),
                ContentKind::Galleries => check_kind(scan::spawn_galleries(&dir), config, visibility),
            },
        })
        .collect()
}

fn check_kind<T: ContentItem>(
    ingest: Ingest<T>,
    config: &PublishConfig,
    visibility: Visibility,
) -> KindReport {
    let (items, stats) = collect::gather(ingest, visibility);
    let collection = Collection::new(items);
    KindReport {
        kind: T::KIND,
        missing: false,
        published: collection.len(),
        pages: paginate::page_count(collection.len(), config.kind(T::KIND).page_size),
        archives: archive::bucket(collection.items()).len(),
        hidden: stats.hidden,
        invalid: stats.failed,
        duplicates: stats.duplicates,
        fatal: stats.fatal,
        write_failures: 0,
    }
}
