//! Catalog Enricher Library
//!
//! Resumable bulk enrichment of a book catalog from line-delimited reference
//! dumps. The binary in `main.rs` is a thin CLI over these modules.

pub mod background_jobs;
pub mod config;
pub mod dump;
pub mod enrichment;
pub mod identifiers;
pub mod job_store;
pub mod mapping_store;
pub mod metrics;
pub mod sqlite_persistence;
pub mod target_store;

// Re-export commonly used types for convenience
pub use background_jobs::{JobController, JobError, StartMode};
pub use job_store::{JobKind, JobStatus, JobStore, SqliteJobStore};
pub use mapping_store::{MappingStore, SqliteMappingStore};
pub use target_store::{SqliteTargetStore, TargetStore};
