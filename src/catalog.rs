//! Catalog: collection and index metadata consumed by the planner
//!
//! The storage engine exposes stable read-only views of collection counts,
//! shard lists, and index descriptors for the duration of planning. The
//! planner never mutates the catalog; it only records which collections a
//! query reads or writes.

use crate::error::{PlannerError, PlannerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Index families known to the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Primary,
    Hash,
    Skiplist,
    Edge,
    Fulltext,
    Geo,
}

impl IndexKind {
    /// Whether scans over this index produce rows in field order.
    pub fn is_sorted(&self) -> bool {
        matches!(self, IndexKind::Skiplist)
    }
}

/// Descriptor of one index on one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub id: String,
    pub kind: IndexKind,
    /// Indexed attribute paths, in index field order
    pub fields: Vec<String>,
    pub unique: bool,
    pub sparse: bool,
    /// Fraction of rows an equality predicate is expected to retain, in
    /// (0, 1]; smaller is more selective. `None` when the index cannot
    /// estimate.
    selectivity: Option<f64>,
}

impl Index {
    pub fn new(
        id: impl Into<String>,
        kind: IndexKind,
        fields: Vec<String>,
        unique: bool,
        sparse: bool,
    ) -> Self {
        Index {
            id: id.into(),
            kind,
            fields,
            unique,
            sparse,
            selectivity: None,
        }
    }

    pub fn with_selectivity(mut self, estimate: f64) -> Self {
        self.selectivity = Some(estimate);
        self
    }

    /// Selectivity estimate, filtered to the meaningful range (0, 1].
    pub fn selectivity_estimate(&self) -> Option<f64> {
        self.selectivity.filter(|s| *s > 0.0 && *s <= 1.0)
    }
}

/// Read-only handle to one collection's planning metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    name: String,
    count: usize,
    shard_ids: Vec<String>,
    indexes: Vec<Index>,
}

impl Collection {
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Collection {
            name: name.into(),
            count,
            shard_ids: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_shards(mut self, shard_ids: Vec<String>) -> Self {
        self.shard_ids = shard_ids;
        self
    }

    pub fn with_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Document count as reported by the storage engine.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn shard_ids(&self) -> &[String] {
        &self.shard_ids
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn index(&self, id: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.id == id)
    }
}

/// How a query touches a collection; `Write` subsumes `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionAccess {
    Read,
    Write,
}

/// All collections visible to one query.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    collections: BTreeMap<String, Collection>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    pub fn add_collection(&mut self, collection: Collection) {
        self.collections.insert(collection.name.clone(), collection);
    }

    pub fn get(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    /// Lookup that surfaces the planner's collection-not-found error.
    pub fn require(&self, name: &str) -> PlannerResult<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| PlannerError::NoSuchCollection {
                name: name.to_string(),
            })
    }

    pub fn require_index<'a>(&'a self, collection: &str, id: &str) -> PlannerResult<&'a Index> {
        self.require(collection)?
            .index(id)
            .ok_or_else(|| PlannerError::NoSuchIndex {
                collection: collection.to_string(),
                id: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_reports_missing_collection() {
        let catalog = Catalog::new();
        let err = catalog.require("ghost").unwrap_err();
        assert_eq!(err.code(), 1203);
    }

    #[test]
    fn selectivity_is_filtered_to_valid_range() {
        let good = Index::new("i1", IndexKind::Hash, vec!["id".to_string()], false, false)
            .with_selectivity(0.5);
        let zero = Index::new("i2", IndexKind::Hash, vec!["id".to_string()], false, false)
            .with_selectivity(0.0);
        let high = Index::new("i3", IndexKind::Hash, vec!["id".to_string()], false, false)
            .with_selectivity(1.5);
        assert_eq!(good.selectivity_estimate(), Some(0.5));
        assert_eq!(zero.selectivity_estimate(), None);
        assert_eq!(high.selectivity_estimate(), None);
    }

    #[test]
    fn index_lookup_by_id() {
        let collection = Collection::new("users", 1000).with_index(Index::new(
            "users/primary",
            IndexKind::Primary,
            vec!["_key".to_string()],
            true,
            false,
        ));
        assert!(collection.index("users/primary").is_some());
        assert!(collection.index("users/other").is_none());
    }
}
