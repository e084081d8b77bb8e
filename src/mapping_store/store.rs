//! SQLite-backed mapping store implementation.

use super::models::IdentifierMapping;
use super::schema::MAPPING_VERSIONED_SCHEMAS;
use super::trait_def::MappingStore;
use crate::sqlite_persistence::open_versioned_db;
use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const COMPLETE_KEY: &str = "complete";

/// SQLite-backed mapping store.
#[derive(Clone)]
pub struct SqliteMappingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMappingStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path.as_ref(), MAPPING_VERSIONED_SCHEMAS, "mapping")?;

        let mappings: i64 =
            conn.query_row("SELECT COUNT(*) FROM identifier_mappings", [], |r| r.get(0))?;
        info!("Mapping store ready: {} identifier mappings", mappings);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

// Helper: deserialize a JSON array of keys, treating malformed rows as empty
fn parse_json_array(json: String) -> Vec<String> {
    serde_json::from_str(&json).unwrap_or_else(|e| {
        warn!("Malformed JSON array in mapping db: {}: {}", json, e);
        Vec::new()
    })
}

impl MappingStore for SqliteMappingStore {
    fn insert_mappings_batch(
        &self,
        namespace: &str,
        mappings: &[IdentifierMapping],
    ) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let tx = conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO identifier_mappings
                 (namespace, identifier, reference_keys, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for mapping in mappings {
                let keys = serde_json::to_string(&mapping.reference_keys)?;
                inserted += stmt.execute(params![namespace, mapping.identifier, keys, now])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn insert_mapping(&self, namespace: &str, mapping: &IdentifierMapping) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let keys = serde_json::to_string(&mapping.reference_keys)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO identifier_mappings
             (namespace, identifier, reference_keys, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![namespace, mapping.identifier, keys, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    fn lookup(&self, namespace: &str, identifier: &str) -> Result<Option<Vec<String>>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT reference_keys FROM identifier_mappings
             WHERE namespace = ?1 AND identifier = ?2",
        )?;
        let keys: Option<String> = stmt
            .query_row(params![namespace, identifier], |r| r.get(0))
            .optional()?;
        Ok(keys.map(parse_json_array))
    }

    fn count_mappings(&self, namespace: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM identifier_mappings WHERE namespace = ?1",
            params![namespace],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    fn is_complete(&self, namespace: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM mapping_state WHERE namespace = ?1 AND key = ?2",
                params![namespace, COMPLETE_KEY],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_complete(&self, namespace: &str, detail: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO mapping_state (namespace, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
            params![namespace, COMPLETE_KEY, detail, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn clear_namespace(&self, namespace: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let mappings = tx.execute(
            "DELETE FROM identifier_mappings WHERE namespace = ?1",
            params![namespace],
        )?;
        tx.execute(
            "DELETE FROM mapping_state WHERE namespace = ?1",
            params![namespace],
        )?;
        tx.execute(
            "DELETE FROM reference_values WHERE namespace = ?1",
            params![namespace],
        )?;
        tx.commit()?;
        info!(
            "Cleared mapping namespace '{}' ({} mappings)",
            namespace, mappings
        );
        Ok(())
    }

    fn clear_reference_values(&self, namespace: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM reference_values WHERE namespace = ?1",
            params![namespace],
        )?;
        Ok(())
    }

    fn insert_reference_values_batch(
        &self,
        namespace: &str,
        values: &[(String, String)],
    ) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO reference_values (namespace, ref_key, value)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (key, value) in values {
                inserted += stmt.execute(params![namespace, key, value])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn get_reference_value(&self, namespace: &str, ref_key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT value FROM reference_values WHERE namespace = ?1 AND ref_key = ?2",
        )?;
        let value = stmt
            .query_row(params![namespace, ref_key], |r| r.get(0))
            .optional()?;
        Ok(value)
    }

    fn count_reference_values(&self, namespace: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM reference_values WHERE namespace = ?1",
            params![namespace],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }
}
