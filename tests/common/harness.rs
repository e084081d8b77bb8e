#![allow(dead_code)]

use super::fixtures::write_dump;
use anyhow::{bail, Result};
use catalog_enricher::background_jobs::{JobController, JobError, StartMode};
use catalog_enricher::config::{DumpSources, EnrichmentSettings};
use catalog_enricher::job_store::{JobKind, JobStatus, JobStore, SqliteJobStore};
use catalog_enricher::mapping_store::{IdentifierMapping, MappingStore, SqliteMappingStore};
use catalog_enricher::target_store::{
    SqliteTargetStore, TargetAttribute, TargetRecord, TargetStore,
};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type Stores = (Arc<dyn JobStore>, Arc<dyn MappingStore>, Arc<dyn TargetStore>);

fn open_stores(dir: &Path, settings: &EnrichmentSettings) -> Stores {
    let job_store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(dir.join("jobs.db")).unwrap());
    let mapping_store: Arc<dyn MappingStore> =
        Arc::new(SqliteMappingStore::new(dir.join("mapping.db")).unwrap());
    let target_store: Arc<dyn TargetStore> = Arc::new(
        SqliteTargetStore::new(dir.join("books.db"), &settings.author_placeholders).unwrap(),
    );
    (job_store, mapping_store, target_store)
}

/// A scratch directory with the three databases and the dump files of both
/// job kinds. Batch sizes and intervals are tiny so every loop boundary is hit.
pub struct TestEnv {
    pub dir: TempDir,
    pub settings: EnrichmentSettings,
    pub job_store: Arc<dyn JobStore>,
    pub mapping_store: Arc<dyn MappingStore>,
    pub target_store: Arc<dyn TargetStore>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(configure: impl FnOnce(&mut EnrichmentSettings)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut settings = EnrichmentSettings {
            write_batch_size: 2,
            update_batch_size: 2,
            checkpoint_interval_lines: 2,
            liveness_interval_lines: 1,
            ..Default::default()
        };
        configure(&mut settings);
        let (job_store, mapping_store, target_store) = open_stores(dir.path(), &settings);
        Self {
            dir,
            settings,
            job_store,
            mapping_store,
            target_store,
        }
    }

    /// New connections over the same files, as another process would open them.
    pub fn reopen(&self) -> Stores {
        open_stores(self.dir.path(), &self.settings)
    }

    pub fn editions_path(&self) -> PathBuf {
        self.dir.path().join("editions.txt")
    }

    pub fn authors_path(&self) -> PathBuf {
        self.dir.path().join("authors.txt")
    }

    pub fn cover_editions_path(&self) -> PathBuf {
        self.dir.path().join("cover_editions.txt")
    }

    pub fn works_path(&self) -> PathBuf {
        self.dir.path().join("works.txt")
    }

    pub fn target_db_path(&self) -> PathBuf {
        self.dir.path().join("books.db")
    }

    pub fn sources(&self) -> HashMap<JobKind, DumpSources> {
        HashMap::from([
            (
                JobKind::AuthorEnrichment,
                DumpSources {
                    mapping_dump: Some(self.editions_path()),
                    reference_dump: Some(self.authors_path()),
                },
            ),
            (
                JobKind::CoverEnrichment,
                DumpSources {
                    mapping_dump: Some(self.cover_editions_path()),
                    reference_dump: Some(self.works_path()),
                },
            ),
        ])
    }

    pub fn write_author_dumps(&self, editions: &[String], authors: &[String]) {
        write_dump(&self.editions_path(), editions);
        write_dump(&self.authors_path(), authors);
    }

    pub fn write_cover_dumps(&self, editions: &[String], works: &[String]) {
        write_dump(&self.cover_editions_path(), editions);
        write_dump(&self.works_path(), works);
    }

    pub fn controller(&self) -> Arc<JobController> {
        self.controller_with(
            self.job_store.clone(),
            self.mapping_store.clone(),
            self.target_store.clone(),
        )
    }

    pub fn controller_with_target(&self, target_store: Arc<dyn TargetStore>) -> Arc<JobController> {
        self.controller_with(self.job_store.clone(), self.mapping_store.clone(), target_store)
    }

    pub fn controller_with(
        &self,
        job_store: Arc<dyn JobStore>,
        mapping_store: Arc<dyn MappingStore>,
        target_store: Arc<dyn TargetStore>,
    ) -> Arc<JobController> {
        Arc::new(JobController::new(
            job_store,
            mapping_store,
            target_store,
            self.settings.clone(),
            self.sources(),
        ))
    }

    fn connect(&self) -> Connection {
        Connection::open(self.target_db_path()).unwrap()
    }

    /// Inserts `(id, isbn, author)` rows.
    pub fn seed_books(&self, books: &[(i64, Option<&str>, Option<&str>)]) {
        let conn = self.connect();
        for (id, isbn, author) in books {
            conn.execute(
                "INSERT INTO books (id, isbn, author) VALUES (?1, ?2, ?3)",
                params![id, isbn, author],
            )
            .unwrap();
        }
    }

    /// Inserts `(id, isbn, cover_id)` rows.
    pub fn seed_cover_books(&self, books: &[(i64, Option<&str>, Option<i64>)]) {
        let conn = self.connect();
        for (id, isbn, cover_id) in books {
            conn.execute(
                "INSERT INTO books (id, isbn, author, cover_id) VALUES (?1, ?2, 'Someone', ?3)",
                params![id, isbn, cover_id],
            )
            .unwrap();
        }
    }

    /// Runs raw SQL against the target database, outside of any store.
    pub fn execute(&self, sql: &str) {
        self.connect().execute_batch(sql).unwrap();
    }

    pub fn authors(&self) -> Vec<(i64, Option<String>)> {
        let conn = self.connect();
        let mut stmt = conn.prepare("SELECT id, author FROM books ORDER BY id").unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    pub fn covers(&self) -> Vec<(i64, Option<i64>)> {
        let conn = self.connect();
        let mut stmt = conn.prepare("SELECT id, cover_id FROM books ORDER BY id").unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    /// Starts a job and runs it on the calling thread.
    pub fn start_and_run(
        controller: &Arc<JobController>,
        kind: JobKind,
        mode: StartMode,
    ) -> (String, Result<JobStatus, JobError>) {
        let job_id = controller.start(kind, mode).unwrap();
        let result = controller.run(&job_id);
        (job_id, result)
    }
}

/// Late-bound reference to a running job, for store hooks that need to act on it.
#[derive(Clone, Default)]
pub struct JobHandle {
    inner: Arc<Mutex<Option<(Arc<JobController>, String)>>>,
}

impl JobHandle {
    pub fn set(&self, controller: &Arc<JobController>, job_id: &str) {
        *self.inner.lock().unwrap() = Some((controller.clone(), job_id.to_string()));
    }

    fn get(&self) -> Option<(Arc<JobController>, String)> {
        self.inner.lock().unwrap().clone()
    }

    pub fn job_id(&self) -> Option<String> {
        self.get().map(|(_, id)| id)
    }

    pub fn pause(&self) {
        if let Some((controller, job_id)) = self.get() {
            controller.pause(&job_id).unwrap();
        }
    }

    pub fn stop(&self) {
        if let Some((controller, job_id)) = self.get() {
            controller.stop(&job_id).unwrap();
        }
    }
}

/// Target store that calls `hook(n)` before the n-th page fetch and records
/// every cursor it is asked to page from. Batch updates and single-record
/// updates can be made to fail.
pub struct HookedTargetStore {
    inner: Arc<dyn TargetStore>,
    hook: Box<dyn Fn(usize) + Send + Sync>,
    fetches: AtomicUsize,
    cursors: Mutex<Vec<i64>>,
    fetched_ids: Mutex<Vec<i64>>,
    fail_batches: AtomicBool,
    failing_ids: Mutex<Vec<i64>>,
}

impl HookedTargetStore {
    pub fn new(inner: Arc<dyn TargetStore>, hook: impl Fn(usize) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            inner,
            hook: Box::new(hook),
            fetches: AtomicUsize::new(0),
            cursors: Mutex::new(Vec::new()),
            fetched_ids: Mutex::new(Vec::new()),
            fail_batches: AtomicBool::new(false),
            failing_ids: Mutex::new(Vec::new()),
        })
    }

    /// Makes every `apply_updates` call fail.
    pub fn fail_batch_updates(&self) {
        self.fail_batches.store(true, Ordering::SeqCst);
    }

    /// Makes `update_one` fail for record `id`.
    pub fn fail_record(&self, id: i64) {
        self.failing_ids.lock().unwrap().push(id);
    }

    pub fn cursors(&self) -> Vec<i64> {
        self.cursors.lock().unwrap().clone()
    }

    pub fn fetched_ids(&self) -> Vec<i64> {
        self.fetched_ids.lock().unwrap().clone()
    }
}

impl TargetStore for HookedTargetStore {
    fn fetch_needing_update(
        &self,
        attribute: TargetAttribute,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<TargetRecord>> {
        let index = self.fetches.fetch_add(1, Ordering::SeqCst);
        (self.hook)(index);
        self.cursors.lock().unwrap().push(after_id);
        let page = self.inner.fetch_needing_update(attribute, after_id, limit)?;
        self.fetched_ids
            .lock()
            .unwrap()
            .extend(page.iter().map(|record| record.id));
        Ok(page)
    }

    fn count_needing_update(&self, attribute: TargetAttribute) -> Result<u64> {
        self.inner.count_needing_update(attribute)
    }

    fn apply_updates(&self, attribute: TargetAttribute, updates: &[(i64, String)]) -> Result<usize> {
        if self.fail_batches.load(Ordering::SeqCst) {
            bail!("batch update rejected");
        }
        self.inner.apply_updates(attribute, updates)
    }

    fn update_one(&self, attribute: TargetAttribute, id: i64, value: &str) -> Result<bool> {
        if self.failing_ids.lock().unwrap().contains(&id) {
            bail!("update of record {} rejected", id);
        }
        self.inner.update_one(attribute, id, value)
    }
}

/// Mapping store that calls `hook(n)` before the n-th batch insert. A hook
/// that panics stands in for a process killed in the middle of the mapping pass.
/// Batch inserts and single-identifier inserts can be made to fail.
pub struct HookedMappingStore {
    inner: Arc<dyn MappingStore>,
    hook: Box<dyn Fn(usize) + Send + Sync>,
    batches: AtomicUsize,
    fail_batches: AtomicBool,
    failing_identifiers: Mutex<Vec<String>>,
}

impl HookedMappingStore {
    pub fn new(inner: Arc<dyn MappingStore>, hook: impl Fn(usize) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            inner,
            hook: Box::new(hook),
            batches: AtomicUsize::new(0),
            fail_batches: AtomicBool::new(false),
            failing_identifiers: Mutex::new(Vec::new()),
        })
    }

    /// Makes every `insert_mappings_batch` call fail, after its hook ran.
    pub fn fail_batch_inserts(&self) {
        self.fail_batches.store(true, Ordering::SeqCst);
    }

    /// Makes `insert_mapping` fail for `identifier`.
    pub fn fail_identifier(&self, identifier: &str) {
        self.failing_identifiers
            .lock()
            .unwrap()
            .push(identifier.to_string());
    }
}

impl MappingStore for HookedMappingStore {
    fn insert_mappings_batch(&self, namespace: &str, mappings: &[IdentifierMapping]) -> Result<usize> {
        let batch = self.batches.fetch_add(1, Ordering::SeqCst);
        (self.hook)(batch);
        if self.fail_batches.load(Ordering::SeqCst) {
            bail!("batch insert rejected");
        }
        self.inner.insert_mappings_batch(namespace, mappings)
    }

    fn insert_mapping(&self, namespace: &str, mapping: &IdentifierMapping) -> Result<bool> {
        if self
            .failing_identifiers
            .lock()
            .unwrap()
            .contains(&mapping.identifier)
        {
            bail!("insert of {} rejected", mapping.identifier);
        }
        self.inner.insert_mapping(namespace, mapping)
    }

    fn lookup(&self, namespace: &str, identifier: &str) -> Result<Option<Vec<String>>> {
        self.inner.lookup(namespace, identifier)
    }

    fn count_mappings(&self, namespace: &str) -> Result<usize> {
        self.inner.count_mappings(namespace)
    }

    fn is_complete(&self, namespace: &str) -> Result<bool> {
        self.inner.is_complete(namespace)
    }

    fn mark_complete(&self, namespace: &str, detail: &str) -> Result<()> {
        self.inner.mark_complete(namespace, detail)
    }

    fn clear_namespace(&self, namespace: &str) -> Result<()> {
        self.inner.clear_namespace(namespace)
    }

    fn clear_reference_values(&self, namespace: &str) -> Result<()> {
        self.inner.clear_reference_values(namespace)
    }

    fn insert_reference_values_batch(
        &self,
        namespace: &str,
        values: &[(String, String)],
    ) -> Result<usize> {
        self.inner.insert_reference_values_batch(namespace, values)
    }

    fn get_reference_value(&self, namespace: &str, ref_key: &str) -> Result<Option<String>> {
        self.inner.get_reference_value(namespace, ref_key)
    }

    fn count_reference_values(&self, namespace: &str) -> Result<usize> {
        self.inner.count_reference_values(namespace)
    }
}
