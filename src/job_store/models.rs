use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Job kinds and lifecycle
// =============================================================================

/// What a job enriches. Also the mapping namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fills missing author names.
    AuthorEnrichment,
    /// Fills missing cover ids.
    CoverEnrichment,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::AuthorEnrichment, JobKind::CoverEnrichment];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::AuthorEnrichment => "author",
            JobKind::CoverEnrichment => "cover",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "author" => Some(JobKind::AuthorEnrichment),
            "cover" => Some(JobKind::CoverEnrichment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Stopped => "stopped",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobStatus::Running),
            "paused" => Some(JobStatus::Paused),
            "stopped" => Some(JobStatus::Stopped),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Stopped | JobStatus::Completed | JobStatus::Failed
        )
    }
}

/// Pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Mapping,
    Caching,
    Updating,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Mapping => "mapping",
            Phase::Caching => "caching",
            Phase::Updating => "updating",
            Phase::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mapping" => Some(Phase::Mapping),
            "caching" => Some(Phase::Caching),
            "updating" => Some(Phase::Updating),
            "done" => Some(Phase::Done),
            _ => None,
        }
    }
}

/// Running counters shared by job rows and checkpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    /// Primary-store records examined by the updater.
    pub processed: u64,
    /// Mappings newly inserted.
    pub created: u64,
    /// Primary-store records updated.
    pub updated: u64,
    /// Dump lines that failed to parse.
    pub dropped: u64,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub phase: Phase,
    /// Percentage in 0..=100.
    pub progress: f64,
    pub summary: Option<String>,
    pub counters: JobCounters,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new_running(id: String, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            status: JobStatus::Running,
            phase: Phase::Mapping,
            progress: 0.0,
            summary: None,
            counters: JobCounters::default(),
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}

// =============================================================================
// Checkpoints
// =============================================================================

/// Durable resume point of a job. One row per job, overwritten on every save.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub job_id: String,
    pub phase: Phase,
    /// Mapping dump lines fully consumed.
    pub line_offset: u64,
    /// Byte position after `line_offset` lines, for uncompressed dumps only.
    pub byte_offset: Option<u64>,
    /// Last primary key handled by the updater.
    pub cursor: Option<i64>,
    /// Records needing update when the updating phase was first entered.
    pub total: Option<u64>,
    pub counters: JobCounters,
}

impl Checkpoint {
    pub fn initial(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            phase: Phase::Mapping,
            line_offset: 0,
            byte_offset: None,
            cursor: None,
            total: None,
            counters: JobCounters::default(),
        }
    }
}

/// A checkpoint moved from an interrupted job to the job that took it over.
#[derive(Debug, Clone, PartialEq)]
pub struct InheritedCheckpoint {
    pub from_job_id: String,
    /// Status of the source job before the handover. A paused source is
    /// stopped by it.
    pub from_status: JobStatus,
    /// The checkpoint as now saved for the inheriting job.
    pub checkpoint: Checkpoint,
}

// =============================================================================
// Audit log
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAuditEventType {
    Started,
    Progress,
    Paused,
    Resumed,
    Stopped,
    Completed,
    Failed,
}

impl JobAuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAuditEventType::Started => "started",
            JobAuditEventType::Progress => "progress",
            JobAuditEventType::Paused => "paused",
            JobAuditEventType::Resumed => "resumed",
            JobAuditEventType::Stopped => "stopped",
            JobAuditEventType::Completed => "completed",
            JobAuditEventType::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(JobAuditEventType::Started),
            "progress" => Some(JobAuditEventType::Progress),
            "paused" => Some(JobAuditEventType::Paused),
            "resumed" => Some(JobAuditEventType::Resumed),
            "stopped" => Some(JobAuditEventType::Stopped),
            "completed" => Some(JobAuditEventType::Completed),
            "failed" => Some(JobAuditEventType::Failed),
            _ => None,
        }
    }
}

/// An entry in the job audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAuditEntry {
    pub id: i64,
    pub job_id: String,
    pub event_type: JobAuditEventType,
    /// Unix timestamp when the event occurred
    pub timestamp: i64,
    pub duration_ms: Option<i64>,
    pub details: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_and_terminal() {
        for status in [
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Stopped,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());
        assert!(JobStatus::parse("bogus").is_none());
    }

    #[test]
    fn test_phases_are_ordered() {
        assert!(Phase::Mapping < Phase::Caching);
        assert!(Phase::Caching < Phase::Updating);
        assert!(Phase::Updating < Phase::Done);
        assert_eq!(Phase::parse("caching"), Some(Phase::Caching));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(JobKind::parse("author"), Some(JobKind::AuthorEnrichment));
        assert_eq!(JobKind::CoverEnrichment.as_str(), "cover");
        assert!(JobKind::parse("isbn").is_none());
    }
}
