//! MappingStore trait definition.

use super::models::IdentifierMapping;
use anyhow::Result;

/// Durable identifier -> reference key mappings, namespaced by enrichment kind.
pub trait MappingStore: Send + Sync {
    // =========================================================================
    // Identifier mappings
    // =========================================================================

    /// Inserts all mappings in one transaction, ignoring identifiers already
    /// present. Returns how many rows were actually inserted.
    fn insert_mappings_batch(&self, namespace: &str, mappings: &[IdentifierMapping])
        -> Result<usize>;

    /// Single-row variant of [`insert_mappings_batch`](Self::insert_mappings_batch).
    fn insert_mapping(&self, namespace: &str, mapping: &IdentifierMapping) -> Result<bool>;

    fn lookup(&self, namespace: &str, identifier: &str) -> Result<Option<Vec<String>>>;

    fn count_mappings(&self, namespace: &str) -> Result<usize>;

    // =========================================================================
    // Namespace state
    // =========================================================================

    fn is_complete(&self, namespace: &str) -> Result<bool>;

    /// Records that the mapping pass finished over the whole dump.
    fn mark_complete(&self, namespace: &str, detail: &str) -> Result<()>;

    /// Drops mappings, markers and spilled reference values of the namespace.
    fn clear_namespace(&self, namespace: &str) -> Result<()>;

    // =========================================================================
    // Spilled reference values
    // =========================================================================

    fn clear_reference_values(&self, namespace: &str) -> Result<()>;

    /// Inserts values, keeping any value already stored for a key.
    fn insert_reference_values_batch(
        &self,
        namespace: &str,
        values: &[(String, String)],
    ) -> Result<usize>;

    fn get_reference_value(&self, namespace: &str, ref_key: &str) -> Result<Option<String>>;

    fn count_reference_values(&self, namespace: &str) -> Result<usize>;
}
