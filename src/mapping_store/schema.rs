//! SQLite schema for the mapping database.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

/// Identifier -> reference keys, first writer wins per (namespace, identifier).
const IDENTIFIER_MAPPINGS_TABLE_V1: Table = Table {
    name: "identifier_mappings",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("namespace", &SqlType::Text, non_null = true),
        sqlite_column!("identifier", &SqlType::Text, non_null = true),
        // JSON array of reference keys
        sqlite_column!("reference_keys", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["namespace", "identifier"]],
};

/// Per-namespace markers, e.g. mapping completion.
const MAPPING_STATE_TABLE_V1: Table = Table {
    name: "mapping_state",
    columns: &[
        sqlite_column!("namespace", &SqlType::Text, non_null = true),
        sqlite_column!("key", &SqlType::Text, non_null = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["namespace", "key"]],
};

/// Reference cache entries that did not fit in memory.
const REFERENCE_VALUES_TABLE_V1: Table = Table {
    name: "reference_values",
    columns: &[
        sqlite_column!("namespace", &SqlType::Text, non_null = true),
        sqlite_column!("ref_key", &SqlType::Text, non_null = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["namespace", "ref_key"]],
};

pub const MAPPING_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        IDENTIFIER_MAPPINGS_TABLE_V1,
        MAPPING_STATE_TABLE_V1,
        REFERENCE_VALUES_TABLE_V1,
    ],
    migration: None,
}];
