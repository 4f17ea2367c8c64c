//! Month archives.
//!
//! Items are bucketed by the UTC `(year, month)` of their publish time.
//! Each bucket becomes `archives/<kind>/<year>/<month>.json`; the list of
//! buckets becomes `archives/<kind>.json`, newest month first:
//!
//! ```json
//! {"data": [{"type": "archives", "id": "posts/2023/february",
//!            "attributes": {"kind": "posts", "year": 2023, "month": "february"}}]}
//! ```

use crate::artifact;
use crate::content::ContentItem;
use crate::jsonapi::{Document, Resource};
use crate::types::ContentKind;
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::path::Path;

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const RESOURCE_TYPE: &str = "archives";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    pub kind: ContentKind,
    pub year: i32,
    pub month: String,
}

impl ArchiveEntry {
    fn new(kind: ContentKind, year: i32, month0: u32) -> Self {
        Self {
            kind,
            year,
            month: MONTHS[month0 as usize].to_string(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}/{}/{}", self.kind, self.year, self.month)
    }

    /// First day of the entry's month, rebuilt from the month name.
    pub fn sort_key(&self) -> Option<NaiveDate> {
        let month = MONTHS.iter().position(|m| *m == self.month)?;
        NaiveDate::from_ymd_opt(self.year, month as u32 + 1, 1)
    }

    pub fn resource(&self) -> Result<Resource, serde_json::Error> {
        Resource::new(RESOURCE_TYPE, &self.id(), self)
    }
}

/// One month's items, newest first.
#[derive(Debug)]
pub struct Bucket<'a, T> {
    pub entry: ArchiveEntry,
    pub items: Vec<&'a T>,
}

/// Group a newest-first slice into month buckets, in order of first
/// encounter. Item order inside each bucket is preserved.
pub fn bucket<T: ContentItem>(items: &[T]) -> Vec<Bucket<'_, T>> {
    let mut buckets: Vec<Bucket<'_, T>> = Vec::new();
    for item in items {
        let at = item.published_at();
        let entry = ArchiveEntry::new(T::KIND, at.year(), at.month0());
        match buckets.iter_mut().find(|b| b.entry == entry) {
            Some(b) => b.items.push(item),
            None => buckets.push(Bucket {
                entry,
                items: vec![item],
            }),
        }
    }
    buckets
}

/// Bucket entries sorted newest month first.
pub fn index<T>(buckets: &[Bucket<'_, T>]) -> Vec<ArchiveEntry> {
    let mut entries: Vec<ArchiveEntry> = buckets.iter().map(|b| b.entry.clone()).collect();
    entries.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    entries
}

impl<T: ContentItem> Bucket<'_, T> {
    pub fn document(&self) -> Result<Document, serde_json::Error> {
        let resources = self
            .items
            .iter()
            .map(|item| item.resource())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Document::many(resources))
    }
}

/// Write the index and every bucket. Returns the number of failed writes.
pub fn write_archives<T: ContentItem>(buckets: &[Bucket<'_, T>], output: &Path) -> usize {
    let kind = T::KIND.as_str();
    let root = output.join(RESOURCE_TYPE);
    let mut failures = 0;

    let index_doc = index(buckets)
        .iter()
        .map(ArchiveEntry::resource)
        .collect::<Result<Vec<_>, _>>()
        .map(Document::many);
    let index_path = root.join(format!("{kind}.json"));
    match index_doc {
        Ok(doc) => {
            if let Err(err) = artifact::write_document(&index_path, &doc) {
                tracing::error!(%kind, error = %err, "failed to write archive index");
                failures += 1;
            }
        }
        Err(err) => {
            tracing::error!(%kind, error = %err, "failed to build archive index");
            failures += 1;
        }
    }

    for bucket in buckets {
        let path = root
            .join(kind)
            .join(bucket.entry.year.to_string())
            .join(format!("{}.json", bucket.entry.month));
        let result = bucket
            .document()
            .map_err(|source| artifact::ArtifactError::Json {
                path: path.clone(),
                source,
            })
            .and_then(|doc| artifact::write_document(&path, &doc));
        if let Err(err) = result {
            tracing::error!(%kind, archive = %bucket.entry.id(), error = %err, "failed to write archive");
            failures += 1;
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::Collection;
    use crate::test_helpers::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn month_table_matches_chrono() {
        for (i, name) in MONTHS.iter().enumerate() {
            let date = NaiveDate::from_ymd_opt(2000, i as u32 + 1, 1).unwrap();
            assert_eq!(date.format("%B").to_string().to_lowercase(), *name);
        }
    }

    #[test]
    fn two_january_one_february() {
        let collection = Collection::new(vec![
            post("a", "2023-01-05"),
            post("b", "2023-02-10"),
            post("c", "2023-01-20"),
        ]);
        let buckets = bucket(collection.items());
        let entries = index(&buckets);
        let ids: Vec<String> = entries.iter().map(ArchiveEntry::id).collect();
        assert_eq!(ids, ["posts/2023/february", "posts/2023/january"]);

        let tmp = TempDir::new().unwrap();
        assert_eq!(write_archives(&buckets, tmp.path()), 0);

        let read = |rel: &str| -> Document {
            serde_json::from_slice(&fs::read(tmp.path().join(rel)).unwrap()).unwrap()
        };
        let feb = read("archives/posts/2023/february.json");
        assert_eq!(feb.data.resources().len(), 1);
        let jan = read("archives/posts/2023/january.json");
        let jan_ids: Vec<&str> = jan.data.resources().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(jan_ids, ["c", "a"]);

        let idx = read("archives/posts.json");
        let first = &idx.data.resources()[0];
        assert_eq!(first.kind, "archives");
        assert_eq!(first.id, "posts/2023/february");
        assert_eq!(first.attributes["year"], 2023);
        assert_eq!(first.attributes["month"], "february");
        assert_eq!(first.attributes["kind"], "posts");
    }

    #[test]
    fn every_item_in_exactly_one_bucket() {
        let dates = [
            "2021-12-31",
            "2022-01-01",
            "2022-01-31",
            "2022-03-15",
            "2020-03-15",
            "2022-03-01",
        ];
        let items: Vec<_> = dates
            .iter()
            .enumerate()
            .map(|(i, d)| post(&format!("p{i}"), d))
            .collect();
        let collection = Collection::new(items);
        let buckets = bucket(collection.items());
        let total: usize = buckets.iter().map(|b| b.items.len()).sum();
        assert_eq!(total, dates.len());

        let entries = index(&buckets);
        assert_eq!(entries.len(), 4);
        for pair in entries.windows(2) {
            assert!(pair[0].sort_key() > pair[1].sort_key());
        }
        // same month name across years stays distinct
        assert!(entries.iter().any(|e| e.id() == "posts/2020/march"));
        assert!(entries.iter().any(|e| e.id() == "posts/2022/march"));
    }

    #[test]
    fn months_sort_by_calendar_not_name() {
        let collection = Collection::new(vec![
            post("a", "2023-04-01"),
            post("b", "2023-08-01"),
            post("c", "2023-12-01"),
        ]);
        let entries = index(&bucket(collection.items()));
        let months: Vec<&str> = entries.iter().map(|e| e.month.as_str()).collect();
        assert_eq!(months, ["december", "august", "april"]);
    }

    #[test]
    fn no_items_writes_empty_index() {
        let tmp = TempDir::new().unwrap();
        let buckets = bucket::<crate::content::Post>(&[]);
        assert_eq!(write_archives(&buckets, tmp.path()), 0);
        let idx: Document =
            serde_json::from_slice(&fs::read(tmp.path().join("archives/posts.json")).unwrap()).unwrap();
        assert!(idx.data.resources().is_empty());
    }
}
