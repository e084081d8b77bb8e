use crate::job_store::{JobKind, JobStatus};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a job's stop signal fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Pause,
    Stop,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Pause => write!(f, "pause requested"),
            StopReason::Stop => write!(f, "stop requested"),
        }
    }
}

/// How a new job picks its starting point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Ignore earlier checkpoints. With `rebuild_mapping` the mapping
    /// namespace and its completion marker are dropped first.
    Fresh { rebuild_mapping: bool },
    /// Inherit the newest checkpoint left by a paused, stopped or failed job of the kind.
    ResumeLatest,
}

impl StartMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartMode::Fresh {
                rebuild_mapping: true,
            } => "fresh_rebuild",
            StartMode::Fresh { .. } => "fresh",
            StartMode::ResumeLatest => "resume_latest",
        }
    }
}

/// Errors that can occur while controlling or executing a job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("A '{}' job is already running", .0.as_str())]
    AlreadyRunning(JobKind),
    #[error("Cannot {action} a job that is {}", .from.as_str())]
    InvalidTransition {
        from: JobStatus,
        action: &'static str,
    },
    #[error("No {which} dump configured for {} jobs", .kind.as_str())]
    NotConfigured { kind: JobKind, which: &'static str },
    #[error("Cannot read dump {path:?}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Cooperative exit at a liveness check. Not a failure.
    #[error("Interrupted: {0}")]
    Interrupted(StopReason),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl JobError {
    pub fn source_unreadable(path: &std::path::Path, source: std::io::Error) -> Self {
        JobError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        }
    }
}
