//! # Publish
//!
//! Turns a directory of markdown posts and photo galleries into a tree of
//! JSON:API documents, then keeps remote stores in step with that tree.
//!
//! # Architecture: Build, Then Sync
//!
//! ```text
//! content/posts/**/*.md          ┐
//! content/galleries/<album>/*.md ┘ → scan → collect → paginate → archive
//!                                                  ↓
//! dist/  items, pages, archives, feeds/{atom.xml,feed.rss}, manifest.json
//!                                                  ↓
//!                       sync b2 / sync kv  (hash-compare, upload changed)
//! ```
//!
//! The build is synchronous: each kind is walked on a producer thread that
//! feeds a bounded channel, items are written in parallel with rayon, and
//! every page and archive is computed from the sorted collection. Sync is
//! async: a tokio worker pool drains a bounded queue of output files and
//! uploads only those whose SHA-1 differs from the remote copy.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Walks a kind's source directory, parses files on a producer thread |
//! | [`content`] | Front matter parsing, markdown rendering, the `Post`/`Album`/`Photo` models |
//! | [`collect`] | Draft filtering, slug de-duplication, item writes, newest-first ordering |
//! | [`paginate`] | Fixed-size pages with first/last/next/prev links |
//! | [`archive`] | Year/month buckets and the per-kind archive index |
//! | [`feed`] | Atom and RSS feeds over every published item |
//! | [`manifest`] | Output tree hashing, remote keys, `manifest.json` |
//! | [`sync`] | Remote store trait, worker pool, B2 and KV backends |
//! | [`pipeline`] | Build and check orchestration |
//! | [`config`] | `publish.toml` loading, merging and validation |
//! | [`jsonapi`] | Document envelope shared by every generated file |
//! | [`artifact`] | Document and asset writes |
//! | [`types`] | Content kinds and site URLs |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Keys Without Extensions
//!
//! A document written to `posts/abc.json` is published under the key
//! `posts/abc`, so the key matches the URL path a reader fetches. Binary
//! assets keep their extension. The manifest records the same keys.
//!
//! ## Failures Are Counted, Not Fatal
//!
//! One malformed post must not block the rest of the site. Parse errors,
//! write errors and upload errors are logged with the offending path or key
//! and tallied in the run's report. Only an unreadable source root or an
//! unwritable output root stops a build.
//!
//! ## SHA-1 Everywhere
//!
//! B2 stores a SHA-1 per object and the KV metadata carries one too, so the
//! manifest uses the same digest. A sync compares local and remote hashes
//! before reading a single remote body.

pub mod archive;
pub mod artifact;
pub mod collect;
pub mod config;
pub mod content;
pub mod feed;
pub mod jsonapi;
pub mod manifest;
pub mod output;
pub mod paginate;
pub mod pipeline;
pub mod scan;
pub mod sync;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
