//! The primary record store the enrichment jobs repair.

mod sqlite_target_store;

pub use sqlite_target_store::SqliteTargetStore;

use anyhow::Result;

/// Attribute of a target record an enrichment fills in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAttribute {
    Author,
    CoverId,
}

impl TargetAttribute {
    pub fn column(&self) -> &'static str {
        match self {
            TargetAttribute::Author => "author",
            TargetAttribute::CoverId => "cover_id",
        }
    }
}

/// A primary-store record still missing its target attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    pub id: i64,
    pub isbn: Option<String>,
}

pub trait TargetStore: Send + Sync {
    /// Records with id > `after_id` whose `attribute` is missing, ascending by id.
    fn fetch_needing_update(
        &self,
        attribute: TargetAttribute,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<TargetRecord>>;

    fn count_needing_update(&self, attribute: TargetAttribute) -> Result<u64>;

    /// Applies all updates in one transaction. Records that no longer need the
    /// attribute are left alone. Returns how many rows changed.
    fn apply_updates(&self, attribute: TargetAttribute, updates: &[(i64, String)]) -> Result<usize>;

    fn update_one(&self, attribute: TargetAttribute, id: i64, value: &str) -> Result<bool>;
}
