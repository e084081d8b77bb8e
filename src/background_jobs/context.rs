use super::job::{JobError, StopReason};
use crate::config::EnrichmentSettings;
use crate::job_store::{Checkpoint, JobCounters, JobKind, JobStatus, JobStore, Phase};
use crate::mapping_store::MappingStore;
use crate::metrics;
use crate::target_store::TargetStore;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Per-job cooperative stop request: a cancellation token plus the reason it fired.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<StopReason>>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. A stop overrides an earlier pause, never the other way round.
    pub fn request(&self, reason: StopReason) {
        {
            let mut current = self.reason.lock().unwrap();
            if *current != Some(StopReason::Stop) {
                *current = Some(reason);
            }
        }
        self.token.cancel();
    }

    pub fn requested(&self) -> Option<StopReason> {
        if !self.token.is_cancelled() {
            return None;
        }
        *self.reason.lock().unwrap()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn same_as(&self, other: &StopSignal) -> bool {
        Arc::ptr_eq(&self.reason, &other.reason)
    }
}

/// Dump files resolved for the running job.
#[derive(Debug, Clone)]
pub struct JobSources {
    pub mapping_dump: PathBuf,
    pub reference_dump: PathBuf,
}

/// Context provided to a job during execution.
///
/// Carries the stores every phase works against, the job's stop signal and
/// the resolved settings.
#[derive(Clone)]
pub struct JobContext {
    /// Id of the job row this run reports to.
    pub job_id: String,

    /// Kind of the job, which selects its profile and metric labels.
    pub kind: JobKind,

    /// In-process pause/stop request for this run.
    pub stop_signal: StopSignal,

    /// Job rows, checkpoints and the audit trail.
    pub job_store: Arc<dyn JobStore>,

    /// Identifier mappings, completion markers and spilled reference values.
    pub mapping_store: Arc<dyn MappingStore>,

    /// The catalog whose records get enriched.
    pub target_store: Arc<dyn TargetStore>,

    /// Batch sizes, intervals and value rules.
    pub settings: EnrichmentSettings,

    /// Mapping and reference dumps for this job's kind.
    pub sources: JobSources,
}

impl JobContext {
    /// Returns `Interrupted` if the job should stop at this point.
    ///
    /// Checks the in-process signal first, then the persisted status, so a
    /// pause or stop written by another process is observed too.
    pub fn ensure_live(&self) -> Result<(), JobError> {
        if let Some(reason) = self.stop_signal.requested() {
            return Err(JobError::Interrupted(reason));
        }
        match self.job_store.get_job_status(&self.job_id)? {
            Some(JobStatus::Running) => Ok(()),
            Some(JobStatus::Paused) => Err(JobError::Interrupted(StopReason::Pause)),
            Some(_) => Err(JobError::Interrupted(StopReason::Stop)),
            None => Err(JobError::NotFound(self.job_id.clone())),
        }
    }

    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), JobError> {
        self.job_store.save_checkpoint(checkpoint)?;
        metrics::record_checkpoint_saved(self.kind.as_str(), checkpoint.phase.as_str());
        Ok(())
    }

    pub fn report_progress(
        &self,
        phase: Phase,
        progress: f64,
        summary: &str,
        counters: &JobCounters,
    ) -> Result<(), JobError> {
        self.job_store
            .update_job_progress(&self.job_id, phase, progress, summary, counters)?;
        Ok(())
    }
}
