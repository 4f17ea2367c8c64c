//! Slicing a collection into linked pages.
//!
//! Page `i` (1-based) covers `[size*(i-1), min(size*i, total))`. Links:
//!
//! | link    | target                                  |
//! |---------|-----------------------------------------|
//! | `first` | `<base>/<segment>`                      |
//! | `last`  | `<base>/<segment>/page/<count>`         |
//! | `prev`  | page `i+1` (older), when `i < count`    |
//! | `next`  | page `i-1` (newer), when `i > 1`        |
//!
//! An empty collection has zero pages.

use crate::artifact;
use crate::content::ContentItem;
use crate::jsonapi::{Document, Links};
use crate::types::SiteUrls;
use std::path::Path;

#[derive(Debug)]
pub struct Page<'a, T> {
    pub number: usize,
    pub items: &'a [T],
    pub links: Links,
}

pub fn page_count(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size)
}

/// Split `items` into pages of `page_size`. `page_size` must be non-zero;
/// config validation rejects zero before a build starts.
pub fn paginate<'a, T>(items: &'a [T], page_size: usize, urls: &SiteUrls) -> Vec<Page<'a, T>> {
    let count = page_count(items.len(), page_size);
    items
        .chunks(page_size)
        .enumerate()
        .map(|(index, chunk)| {
            let number = index + 1;
            Page {
                number,
                items: chunk,
                links: Links {
                    first: urls.index(),
                    last: urls.page(count),
                    next: (number > 1).then(|| urls.page(number - 1)),
                    prev: (number < count).then(|| urls.page(number + 1)),
                },
            }
        })
        .collect()
}

impl<T: ContentItem> Page<'_, T> {
    pub fn document(&self) -> Result<Document, serde_json::Error> {
        let resources = self
            .items
            .iter()
            .map(T::resource)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Document::many(resources).with_links(self.links.clone()))
    }
}

/// Write `<kind>/page/<n>.json` for every page and page 1 again as
/// `<kind>.json`. Returns the number of failed writes.
pub fn write_pages<T: ContentItem>(pages: &[Page<'_, T>], output: &Path) -> usize {
    let kind = T::KIND.as_str();
    let mut failures = 0;
    for page in pages {
        let doc = match page.document() {
            Ok(doc) => doc,
            Err(err) => {
                tracing::error!(%kind, page = page.number, error = %err, "failed to build page");
                failures += 1;
                continue;
            }
        };

        let mut targets = vec![output.join(kind).join("page").join(format!("{}.json", page.number))];
        if page.number == 1 {
            targets.push(output.join(format!("{kind}.json")));
        }
        for path in targets {
            if let Err(err) = artifact::write_document(&path, &doc) {
                tracing::error!(%kind, page = page.number, error = %err, "failed to write page");
                failures += 1;
            }
        }
    }
    failures
}
