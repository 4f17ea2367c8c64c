//! JSON:API document envelope shared by every generated file.
//!
//! ```json
//! {
//!   "data": { "type": "posts", "id": "abc", "attributes": { ... } },
//!   "links": { "first": "...", "last": "...", "next": "...", "prev": "..." },
//!   "included": [ ... ]
//! }
//! ```
//!
//! `data` is a single resource for item documents and an array for pages
//! and archives. `links` only appears on pages, `included` only on gallery
//! documents (the album's photos).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub data: Data,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<Resource>,
}

impl Document {
    pub fn one(resource: Resource) -> Self {
        Self {
            data: Data::One(resource),
            links: None,
            included: Vec::new(),
        }
    }

    pub fn many(resources: Vec<Resource>) -> Self {
        Self {
            data: Data::Many(resources),
            links: None,
            included: Vec::new(),
        }
    }

    pub fn with_links(mut self, links: Links) -> Self {
        self.links = Some(links);
        self
    }

    pub fn with_included(mut self, included: Vec<Resource>) -> Self {
        self.included = included;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Data {
    One(Resource),
    Many(Vec<Resource>),
}

impl Data {
    /// Resources in document order, regardless of cardinality.
    pub fn resources(&self) -> &[Resource] {
        match self {
            Data::One(r) => std::slice::from_ref(r),
            Data::Many(rs) => rs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub attributes: serde_json::Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, Relationship>,
}

impl Resource {
    pub fn new(
        kind: &str,
        id: &str,
        attributes: &impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: kind.to_string(),
            id: id.to_string(),
            attributes: serde_json::to_value(attributes)?,
            relationships: BTreeMap::new(),
        })
    }

    pub fn relate(mut self, name: &str, linkage: Linkage) -> Self {
        self.relationships
            .insert(name.to_string(), Relationship { data: linkage });
        self
    }

    pub fn identifier(&self) -> Identifier {
        Identifier {
            id: self.id.clone(),
            kind: self.kind.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub data: Linkage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Linkage {
    One(Identifier),
    Many(Vec<Identifier>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identifier {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Pagination links. `next` points at the newer neighbour (lower page
/// number), `prev` at the older one (higher page number).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Links {
    pub first: String,
    pub last: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
}
