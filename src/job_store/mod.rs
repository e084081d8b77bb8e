mod models;
mod schema;
mod sqlite_job_store;

pub use models::*;
pub use schema::JOBS_VERSIONED_SCHEMAS;
pub use sqlite_job_store::SqliteJobStore;

use anyhow::Result;

pub trait JobStore: Send + Sync {
    // Jobs
    /// Inserts `job` and, in the same transaction, moves every other `running`
    /// row of the same kind to `stopped`. Returns the number of ghosts stopped.
    fn create_job(&self, job: &JobRecord) -> Result<usize>;
    fn get_job(&self, id: &str) -> Result<Option<JobRecord>>;
    fn get_job_status(&self, id: &str) -> Result<Option<JobStatus>>;
    fn list_jobs(&self, kind: Option<JobKind>, limit: usize) -> Result<Vec<JobRecord>>;
    /// Moves a paused job back to `running`, stopping ghosts of its kind in the
    /// same transaction. Returns `None` if the job was not paused, else the ghost count.
    fn resume_job(&self, id: &str) -> Result<Option<usize>>;
    /// Sets `status` only if the current status is one of `from`. Returns whether it applied.
    fn transition_job_status(&self, id: &str, from: &[JobStatus], to: JobStatus) -> Result<bool>;
    /// Unconditionally persists a final (or paused) status with its summary.
    fn finish_job(&self, id: &str, status: JobStatus, summary: &str) -> Result<()>;
    fn update_job_progress(
        &self,
        id: &str,
        phase: Phase,
        progress: f64,
        summary: &str,
        counters: &JobCounters,
    ) -> Result<()>;

    // Checkpoints
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
    fn load_checkpoint(&self, job_id: &str) -> Result<Option<Checkpoint>>;
    fn clear_checkpoint(&self, job_id: &str) -> Result<()>;
    /// Moves the newest checkpoint left behind by a paused, stopped or failed
    /// job of `kind` to `job_id`, in one transaction. The source loses its
    /// checkpoint and, if paused, becomes `stopped`. Checkpoints of jobs
    /// created before a later completed job of the kind are never taken.
    fn take_resumable_checkpoint(
        &self,
        kind: JobKind,
        job_id: &str,
    ) -> Result<Option<InheritedCheckpoint>>;

    // Job audit log
    fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64>;
    fn get_job_audit_log_by_job(&self, job_id: &str, limit: usize) -> Result<Vec<JobAuditEntry>>;
}
