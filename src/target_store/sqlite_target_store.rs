use super::{TargetAttribute, TargetRecord, TargetStore};
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// `books(id, isbn, author, cover_id)` in a SQLite database.
pub struct SqliteTargetStore {
    conn: Arc<Mutex<Connection>>,
    author_missing: String,
    cover_missing: String,
}

impl SqliteTargetStore {
    /// Opens the target database. `placeholders` are author values treated as
    /// missing, compared case-insensitively after trimming.
    pub fn new<P: AsRef<Path>>(db_path: P, placeholders: &[String]) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open target database at {:?}", path))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on target database")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY,
                isbn TEXT,
                author TEXT,
                cover_id INTEGER
            )",
            [],
        )?;

        let books: i64 = conn.query_row("SELECT COUNT(*) FROM books", [], |r| r.get(0))?;
        info!("Target store ready at {:?}: {} books", path, books);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            author_missing: Self::author_missing_clause(placeholders),
            cover_missing: "(cover_id IS NULL OR cover_id <= 0)".to_string(),
        })
    }

    fn author_missing_clause(placeholders: &[String]) -> String {
        let literals: Vec<String> = placeholders
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .map(|p| format!("'{}'", p.replace('\'', "''")))
            .collect();
        if literals.is_empty() {
            "(author IS NULL OR TRIM(author) = '')".to_string()
        } else {
            format!(
                "(author IS NULL OR TRIM(author) = '' OR LOWER(TRIM(author)) IN ({}))",
                literals.join(", ")
            )
        }
    }

    fn missing_clause(&self, attribute: TargetAttribute) -> &str {
        match attribute {
            TargetAttribute::Author => &self.author_missing,
            TargetAttribute::CoverId => &self.cover_missing,
        }
    }

    fn update_sql(&self, attribute: TargetAttribute) -> String {
        format!(
            "UPDATE books SET {} = ?1 WHERE id = ?2 AND {}",
            attribute.column(),
            self.missing_clause(attribute)
        )
    }
}

impl TargetStore for SqliteTargetStore {
    fn fetch_needing_update(
        &self,
        attribute: TargetAttribute,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<TargetRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT id, isbn FROM books WHERE {} AND id > ?1 ORDER BY id LIMIT ?2",
            self.missing_clause(attribute)
        ))?;
        let records = stmt
            .query_map(params![after_id, limit as i64], |row| {
                Ok(TargetRecord {
                    id: row.get(0)?,
                    isbn: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn count_needing_update(&self, attribute: TargetAttribute) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM books WHERE {}",
                self.missing_clause(attribute)
            ),
            [],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    fn apply_updates(&self, attribute: TargetAttribute, updates: &[(i64, String)]) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare_cached(&self.update_sql(attribute))?;
            for (id, value) in updates {
                changed += stmt.execute(params![value, id])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    fn update_one(&self, attribute: TargetAttribute, id: i64, value: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(&self.update_sql(attribute), params![value, id])?;
        Ok(changed > 0)
    }
}
