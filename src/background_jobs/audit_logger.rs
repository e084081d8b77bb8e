//! Job audit logging utilities.
//!
//! Provides a convenient interface for enrichment jobs to log audit events.

use crate::job_store::{JobAuditEventType, JobStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Helper for logging job audit events.
///
/// Audit failures are logged and otherwise ignored: they never change the
/// outcome of a job.
pub struct JobAuditLogger {
    job_store: Arc<dyn JobStore>,
    job_id: String,
    start_time: Instant,
}

impl JobAuditLogger {
    /// Create a new audit logger for a job.
    pub fn new(job_store: Arc<dyn JobStore>, job_id: &str) -> Self {
        Self {
            job_store,
            job_id: job_id.to_string(),
            start_time: Instant::now(),
        }
    }

    fn log(
        &self,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) {
        if let Err(e) =
            self.job_store
                .log_job_audit(&self.job_id, event_type.clone(), duration_ms, details, error)
        {
            warn!(
                "Failed to write {} audit entry for job {}: {}",
                event_type.as_str(),
                self.job_id,
                e
            );
        }
    }

    pub fn log_started(&self, details: Option<serde_json::Value>) {
        self.log(JobAuditEventType::Started, None, details.as_ref(), None);
    }

    pub fn log_resumed(&self, details: Option<serde_json::Value>) {
        self.log(JobAuditEventType::Resumed, None, details.as_ref(), None);
    }

    /// Log a progress update during job execution.
    pub fn log_progress(&self, details: serde_json::Value) {
        self.log(JobAuditEventType::Progress, None, Some(&details), None);
    }

    pub fn log_paused(&self, details: Option<serde_json::Value>) {
        self.log(
            JobAuditEventType::Paused,
            Some(self.elapsed_ms()),
            details.as_ref(),
            None,
        );
    }

    pub fn log_stopped(&self, details: Option<serde_json::Value>) {
        self.log(
            JobAuditEventType::Stopped,
            Some(self.elapsed_ms()),
            details.as_ref(),
            None,
        );
    }

    /// Log that the job has completed successfully.
    pub fn log_completed(&self, details: Option<serde_json::Value>) {
        self.log(
            JobAuditEventType::Completed,
            Some(self.elapsed_ms()),
            details.as_ref(),
            None,
        );
    }

    /// Log that the job has failed.
    pub fn log_failed(&self, error: &str, details: Option<serde_json::Value>) {
        self.log(
            JobAuditEventType::Failed,
            Some(self.elapsed_ms()),
            details.as_ref(),
            Some(error),
        );
    }

    /// Get the elapsed time since the logger was created.
    pub fn elapsed_ms(&self) -> i64 {
        self.start_time.elapsed().as_millis() as i64
    }
}
