use super::audit_logger::JobAuditLogger;
use super::context::{JobContext, JobSources, StopSignal};
use super::job::{JobError, StartMode, StopReason};
use crate::config::{DumpSources, EnrichmentSettings};
use crate::enrichment::{
    checkpoint_progress, counters_summary, profile_for, EnrichmentProfile, MappingBuilder, RecordUpdater,
    ReferenceCache,
};
use crate::job_store::{Checkpoint, JobKind, JobRecord, JobStatus, JobStore, Phase};
use crate::mapping_store::MappingStore;
use crate::metrics;
use crate::target_store::TargetStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A job that can currently be paused or stopped through its signal.
struct ActiveJob {
    kind: JobKind,
    signal: StopSignal,
}

#[derive(Default)]
struct Registry {
    /// Jobs registered by start/resume, until paused, stopped or finished.
    signals: HashMap<String, ActiveJob>,
    /// Jobs whose phases are executing on some thread of this process.
    running: HashMap<String, JobKind>,
}

impl Registry {
    fn kind_busy(&self, kind: JobKind) -> bool {
        self.signals.values().any(|a| a.kind == kind) || self.running.values().any(|k| *k == kind)
    }
}

/// Drives enrichment jobs through their phases and owns the in-process
/// registry of stop signals.
///
/// Lifecycle writes to the job row happen while the registry lock is held,
/// so control calls and job finalization in one process never interleave.
pub struct JobController {
    job_store: Arc<dyn JobStore>,
    mapping_store: Arc<dyn MappingStore>,
    target_store: Arc<dyn TargetStore>,
    settings: EnrichmentSettings,
    sources: HashMap<JobKind, DumpSources>,
    registry: Mutex<Registry>,
}

impl JobController {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        mapping_store: Arc<dyn MappingStore>,
        target_store: Arc<dyn TargetStore>,
        settings: EnrichmentSettings,
        sources: HashMap<JobKind, DumpSources>,
    ) -> Self {
        Self {
            job_store,
            mapping_store,
            target_store,
            settings,
            sources,
            registry: Mutex::new(Registry::default()),
        }
    }

    fn sources_for(&self, kind: JobKind) -> Result<JobSources, JobError> {
        let configured = self.sources.get(&kind);
        let mapping_dump = configured
            .and_then(|s| s.mapping_dump.clone())
            .ok_or(JobError::NotConfigured {
                kind,
                which: "mapping",
            })?;
        let reference_dump = configured
            .and_then(|s| s.reference_dump.clone())
            .ok_or(JobError::NotConfigured {
                kind,
                which: "reference",
            })?;
        Ok(JobSources {
            mapping_dump,
            reference_dump,
        })
    }

    fn status_of(&self, job_id: &str) -> Result<JobStatus, JobError> {
        self.job_store
            .get_job_status(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Creates a running job of `kind` and registers its stop signal.
    ///
    /// Rows of the same kind still marked running without a live owner are
    /// stopped in the same transaction.
    pub fn start(&self, kind: JobKind, mode: StartMode) -> Result<String, JobError> {
        let mut registry = self.registry.lock().unwrap();
        if registry.kind_busy(kind) {
            return Err(JobError::AlreadyRunning(kind));
        }
        self.sources_for(kind)?;

        let job_id = uuid::Uuid::new_v4().to_string();
        // Ghosts go first so a crashed job's checkpoint becomes inheritable
        let ghosts = self
            .job_store
            .create_job(&JobRecord::new_running(job_id.clone(), kind))?;
        if ghosts > 0 {
            warn!(
                "Stopped {} '{}' job(s) left running without a live process",
                ghosts,
                kind.as_str()
            );
        }

        let inherited_from = match self.prepare_checkpoint(&job_id, kind, mode) {
            Ok(inherited_from) => inherited_from,
            Err(e) => {
                let summary = format!("Failed to start: {}", e);
                if let Err(store_err) =
                    self.job_store
                        .finish_job(&job_id, JobStatus::Failed, &summary)
                {
                    error!("[{}] Failed to record failure: {:#}", job_id, store_err);
                }
                return Err(e);
            }
        };

        registry.signals.insert(
            job_id.clone(),
            ActiveJob {
                kind,
                signal: StopSignal::new(),
            },
        );
        JobAuditLogger::new(self.job_store.clone(), &job_id).log_started(Some(
            serde_json::json!({
                "kind": kind.as_str(),
                "mode": mode.as_str(),
                "inherited_from": inherited_from,
                "ghosts_stopped": ghosts,
            }),
        ));
        info!("Started {} job {} ({})", kind.as_str(), job_id, mode.as_str());
        Ok(job_id)
    }

    /// Saves the first checkpoint of a new job. Returns the id of the job
    /// whose checkpoint was inherited, if any.
    fn prepare_checkpoint(
        &self,
        job_id: &str,
        kind: JobKind,
        mode: StartMode,
    ) -> Result<Option<String>, JobError> {
        let checkpoint = match mode {
            StartMode::Fresh { rebuild_mapping } => {
                if rebuild_mapping {
                    info!("Clearing '{}' mapping namespace for rebuild", kind.as_str());
                    self.mapping_store.clear_namespace(kind.as_str())?;
                }
                Checkpoint::initial(job_id)
            }
            StartMode::ResumeLatest => {
                match self.job_store.take_resumable_checkpoint(kind, job_id)? {
                    Some(inherited) => {
                        let previous = &inherited.checkpoint;
                        info!(
                            "Job {} inherits the {} checkpoint of job {}",
                            job_id,
                            previous.phase.as_str(),
                            inherited.from_job_id
                        );
                        if inherited.from_status == JobStatus::Paused {
                            JobAuditLogger::new(self.job_store.clone(), &inherited.from_job_id)
                                .log_stopped(Some(serde_json::json!({ "superseded_by": job_id })));
                        }
                        self.job_store.update_job_progress(
                            job_id,
                            previous.phase,
                            checkpoint_progress(previous),
                            &format!(
                                "Resuming from the checkpoint of job {}",
                                inherited.from_job_id
                            ),
                            &previous.counters,
                        )?;
                        return Ok(Some(inherited.from_job_id));
                    }
                    None => Checkpoint::initial(job_id),
                }
            }
        };
        self.job_store.save_checkpoint(&checkpoint)?;
        Ok(None)
    }

    /// Requests a pause. The row becomes `paused` right away; the executing
    /// thread exits at its next liveness check.
    pub fn pause(&self, job_id: &str) -> Result<(), JobError> {
        let mut registry = self.registry.lock().unwrap();
        let status = self.status_of(job_id)?;
        if status != JobStatus::Running {
            return Err(JobError::InvalidTransition {
                from: status,
                action: "pause",
            });
        }
        if let Some(active) = registry.signals.remove(job_id) {
            active.signal.request(StopReason::Pause);
        }
        if !self
            .job_store
            .transition_job_status(job_id, &[JobStatus::Running], JobStatus::Paused)?
        {
            return Err(JobError::InvalidTransition {
                from: self.status_of(job_id)?,
                action: "pause",
            });
        }
        info!("Pause requested for job {}", job_id);
        if !registry.running.contains_key(job_id) {
            JobAuditLogger::new(self.job_store.clone(), job_id).log_paused(None);
        }
        Ok(())
    }

    /// Moves a paused job back to running and registers a fresh stop signal.
    /// The caller then runs it again with [`run`](Self::run) or [`spawn`](Self::spawn).
    pub fn resume(&self, job_id: &str) -> Result<(), JobError> {
        let mut registry = self.registry.lock().unwrap();
        let job = self
            .job_store
            .get_job(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if registry.signals.contains_key(job_id)
            || registry.running.contains_key(job_id)
            || registry.kind_busy(job.kind)
        {
            return Err(JobError::AlreadyRunning(job.kind));
        }
        self.sources_for(job.kind)?;

        let Some(ghosts) = self.job_store.resume_job(job_id)? else {
            return Err(JobError::InvalidTransition {
                from: self.status_of(job_id)?,
                action: "resume",
            });
        };
        if ghosts > 0 {
            warn!(
                "Stopped {} '{}' job(s) left running without a live process",
                ghosts,
                job.kind.as_str()
            );
        }

        registry.signals.insert(
            job_id.to_string(),
            ActiveJob {
                kind: job.kind,
                signal: StopSignal::new(),
            },
        );
        JobAuditLogger::new(self.job_store.clone(), job_id)
            .log_resumed(Some(serde_json::json!({ "ghosts_stopped": ghosts })));
        info!("Resumed {} job {}", job.kind.as_str(), job_id);
        Ok(())
    }

    /// Cancels a running or paused job for good. Its checkpoint is kept.
    pub fn stop(&self, job_id: &str) -> Result<(), JobError> {
        let mut registry = self.registry.lock().unwrap();
        let status = self.status_of(job_id)?;
        if status.is_terminal() {
            return Err(JobError::InvalidTransition {
                from: status,
                action: "stop",
            });
        }
        if let Some(active) = registry.signals.remove(job_id) {
            active.signal.request(StopReason::Stop);
        }
        if !self.job_store.transition_job_status(
            job_id,
            &[JobStatus::Running, JobStatus::Paused],
            JobStatus::Stopped,
        )? {
            return Err(JobError::InvalidTransition {
                from: self.status_of(job_id)?,
                action: "stop",
            });
        }
        info!("Stop requested for job {}", job_id);
        if !registry.running.contains_key(job_id) {
            JobAuditLogger::new(self.job_store.clone(), job_id).log_stopped(None);
        }
        Ok(())
    }

    pub fn status(&self, job_id: &str) -> Result<JobRecord, JobError> {
        self.job_store
            .get_job(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    pub fn list(&self, kind: Option<JobKind>, limit: usize) -> Result<Vec<JobRecord>, JobError> {
        Ok(self.job_store.list_jobs(kind, limit)?)
    }

    /// Jobs registered in this process, sorted by id.
    pub fn active_jobs(&self) -> Vec<(String, JobKind)> {
        let registry = self.registry.lock().unwrap();
        let mut jobs: Vec<(String, JobKind)> = registry
            .signals
            .iter()
            .map(|(id, active)| (id.clone(), active.kind))
            .collect();
        jobs.sort();
        jobs
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Runs a started or resumed job on a blocking thread.
    pub fn spawn(self: &Arc<Self>, job_id: &str) -> JoinHandle<Result<JobStatus, JobError>> {
        let controller = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::task::spawn_blocking(move || controller.run(&job_id))
    }

    /// Executes the remaining phases of a registered job on the calling
    /// thread and persists the outcome.
    ///
    /// Returns the status the job ended in. A failed job returns its error.
    pub fn run(&self, job_id: &str) -> Result<JobStatus, JobError> {
        let (kind, signal) = {
            let mut registry = self.registry.lock().unwrap();
            let Some(active) = registry.signals.get(job_id) else {
                return Err(JobError::InvalidTransition {
                    from: self.status_of(job_id)?,
                    action: "run",
                });
            };
            let (kind, signal) = (active.kind, active.signal.clone());
            if registry.running.contains_key(job_id) {
                return Err(JobError::AlreadyRunning(kind));
            }
            registry.running.insert(job_id.to_string(), kind);
            (kind, signal)
        };

        let result = self.run_registered(job_id, kind, &signal);

        let mut registry = self.registry.lock().unwrap();
        registry.running.remove(job_id);
        if registry
            .signals
            .get(job_id)
            .is_some_and(|active| active.signal.same_as(&signal))
        {
            registry.signals.remove(job_id);
        }
        result
    }

    fn run_registered(
        &self,
        job_id: &str,
        kind: JobKind,
        signal: &StopSignal,
    ) -> Result<JobStatus, JobError> {
        let ctx = JobContext {
            job_id: job_id.to_string(),
            kind,
            stop_signal: signal.clone(),
            job_store: self.job_store.clone(),
            mapping_store: self.mapping_store.clone(),
            target_store: self.target_store.clone(),
            settings: self.settings.clone(),
            sources: self.sources_for(kind)?,
        };
        let profile = profile_for(kind, &self.settings);
        let audit = JobAuditLogger::new(self.job_store.clone(), job_id);

        let mut checkpoint = Checkpoint::initial(job_id);
        let outcome = match self.job_store.load_checkpoint(job_id) {
            Ok(saved) => {
                if let Some(saved) = saved {
                    checkpoint = saved;
                }
                info!(
                    "[{}] Running {} job from the {} phase",
                    job_id,
                    kind.as_str(),
                    checkpoint.phase.as_str()
                );
                self.execute_phases(&ctx, profile.as_ref(), &audit, &mut checkpoint)
            }
            Err(e) => Err(e.into()),
        };

        self.finalize(&ctx, &audit, &checkpoint, outcome)
    }

    fn execute_phases(
        &self,
        ctx: &JobContext,
        profile: &dyn EnrichmentProfile,
        audit: &JobAuditLogger,
        checkpoint: &mut Checkpoint,
    ) -> Result<(), JobError> {
        ctx.ensure_live()?;

        if checkpoint.phase == Phase::Mapping {
            if ctx.mapping_store.is_complete(profile.namespace())? {
                info!(
                    "[{}] '{}' mappings already complete, skipping the mapping pass",
                    ctx.job_id,
                    profile.namespace()
                );
                checkpoint.phase = Phase::Caching;
                checkpoint.line_offset = 0;
                checkpoint.byte_offset = None;
                ctx.save_checkpoint(checkpoint)?;
            } else {
                timed(ctx.kind, Phase::Mapping, || {
                    MappingBuilder::new(ctx, profile, audit).run(checkpoint)
                })?;
            }
        }

        if checkpoint.phase == Phase::Done {
            return Ok(());
        }

        ctx.ensure_live()?;
        let remaining = ctx
            .target_store
            .count_needing_update(profile.attribute())?;
        if remaining == 0 {
            info!(
                "[{}] No records are missing '{}', nothing to update",
                ctx.job_id,
                profile.attribute().column()
            );
            checkpoint.phase = Phase::Done;
            ctx.save_checkpoint(checkpoint)?;
            return Ok(());
        }

        let cache = timed(ctx.kind, Phase::Caching, || {
            ReferenceCache::build(ctx, profile, checkpoint)
        })?;
        ctx.ensure_live()?;
        timed(ctx.kind, Phase::Updating, || {
            RecordUpdater::new(ctx, profile, &cache, audit).run(checkpoint)
        })
    }

    /// Persists how the run ended.
    fn finalize(
        &self,
        ctx: &JobContext,
        audit: &JobAuditLogger,
        checkpoint: &Checkpoint,
        outcome: Result<(), JobError>,
    ) -> Result<JobStatus, JobError> {
        let job_id = ctx.job_id.as_str();
        let kind = ctx.kind.as_str();
        let counters = &checkpoint.counters;
        let details = serde_json::json!({
            "phase": checkpoint.phase.as_str(),
            "processed": counters.processed,
            "created": counters.created,
            "updated": counters.updated,
            "dropped": counters.dropped,
        });

        match outcome {
            Ok(()) => {
                let summary = format!("Completed: {}", counters_summary(counters));
                let persisted = self
                    .job_store
                    .update_job_progress(job_id, Phase::Done, 100.0, &summary, counters)
                    .and_then(|_| self.job_store.clear_checkpoint(job_id))
                    .and_then(|_| {
                        self.job_store
                            .finish_job(job_id, JobStatus::Completed, &summary)
                    });
                if let Err(e) = persisted {
                    error!("[{}] Failed to record completion: {:#}", job_id, e);
                }
                audit.log_completed(Some(details));
                metrics::record_job_run(kind, "completed");
                info!("[{}] {}", job_id, summary);
                Ok(JobStatus::Completed)
            }
            Err(JobError::Interrupted(reason)) => {
                let _registry = self.registry.lock().unwrap();
                let current = self.status_of(job_id)?;
                // A pause never overrides a stop, and neither overrides a
                // terminal state written by someone else.
                let target = match (reason, current) {
                    (StopReason::Pause, JobStatus::Running | JobStatus::Paused) => {
                        Some(JobStatus::Paused)
                    }
                    (
                        StopReason::Stop,
                        JobStatus::Running | JobStatus::Paused | JobStatus::Stopped,
                    ) => Some(JobStatus::Stopped),
                    _ => None,
                };
                let Some(status) = target else {
                    info!(
                        "[{}] Exited on {} while the job is {}",
                        job_id,
                        reason,
                        current.as_str()
                    );
                    return Ok(current);
                };

                let label = if status == JobStatus::Paused {
                    "Paused"
                } else {
                    "Stopped"
                };
                let summary = format!(
                    "{} during the {} phase: {}",
                    label,
                    checkpoint.phase.as_str(),
                    counters_summary(counters)
                );
                self.job_store.finish_job(job_id, status, &summary)?;
                if status == JobStatus::Paused {
                    audit.log_paused(Some(details));
                } else {
                    audit.log_stopped(Some(details));
                }
                metrics::record_job_run(kind, status.as_str());
                info!("[{}] {}", job_id, summary);
                Ok(status)
            }
            Err(e) => {
                let summary = format!(
                    "Failed during the {} phase: {} ({})",
                    checkpoint.phase.as_str(),
                    e,
                    counters_summary(counters)
                );
                error!("[{}] {}", job_id, summary);
                if let Err(store_err) =
                    self.job_store
                        .finish_job(job_id, JobStatus::Failed, &summary)
                {
                    error!("[{}] Failed to record failure: {:#}", job_id, store_err);
                }
                audit.log_failed(&e.to_string(), Some(details));
                metrics::record_job_run(kind, "failed");
                Err(e)
            }
        }
    }
}

fn timed<T>(
    kind: JobKind,
    phase: Phase,
    f: impl FnOnce() -> Result<T, JobError>,
) -> Result<T, JobError> {
    let started = Instant::now();
    let result = f();
    metrics::record_phase_duration(kind.as_str(), phase.as_str(), started.elapsed());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::SqliteJobStore;
    use crate::mapping_store::SqliteMappingStore;
    use crate::target_store::SqliteTargetStore;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct TestController {
        controller: JobController,
        job_store: Arc<dyn JobStore>,
        _temp_dir: TempDir,
    }

    fn create_test_controller(configured: bool) -> TestController {
        let temp_dir = TempDir::new().unwrap();
        let job_store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(temp_dir.path().join("jobs.db")).unwrap());
        let mapping_store: Arc<dyn MappingStore> =
            Arc::new(SqliteMappingStore::new(temp_dir.path().join("mapping.db")).unwrap());
        let target_store: Arc<dyn TargetStore> = Arc::new(
            SqliteTargetStore::new(temp_dir.path().join("books.db"), &[]).unwrap(),
        );

        let mut sources = HashMap::new();
        if configured {
            sources.insert(
                JobKind::AuthorEnrichment,
                DumpSources {
                    mapping_dump: Some(PathBuf::from("/nonexistent/editions.txt")),
                    reference_dump: Some(PathBuf::from("/nonexistent/authors.txt")),
                },
            );
        }

        let controller = JobController::new(
            job_store.clone(),
            mapping_store,
            target_store,
            EnrichmentSettings::default(),
            sources,
        );
        TestController {
            controller,
            job_store,
            _temp_dir: temp_dir,
        }
    }

    const FRESH: StartMode = StartMode::Fresh {
        rebuild_mapping: false,
    };

    #[test]
    fn test_start_rejects_second_job_of_same_kind() {
        let t = create_test_controller(true);
        let job_id = t.controller.start(JobKind::AuthorEnrichment, FRESH).unwrap();

        let err = t
            .controller
            .start(JobKind::AuthorEnrichment, FRESH)
            .unwrap_err();
        assert!(matches!(err, JobError::AlreadyRunning(JobKind::AuthorEnrichment)));
        assert_eq!(
            t.controller.active_jobs(),
            vec![(job_id, JobKind::AuthorEnrichment)]
        );
    }

    #[test]
    fn test_start_requires_configured_sources() {
        let t = create_test_controller(false);
        let err = t
            .controller
            .start(JobKind::AuthorEnrichment, FRESH)
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::NotConfigured {
                which: "mapping",
                ..
            }
        ));
        assert!(t.job_store.list_jobs(None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_dump_fails_job_and_keeps_checkpoint() {
        let t = create_test_controller(true);
        let job_id = t.controller.start(JobKind::AuthorEnrichment, FRESH).unwrap();

        let err = t.controller.run(&job_id).unwrap_err();
        assert!(matches!(err, JobError::SourceUnreadable { .. }));

        let job = t.controller.status(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.summary.unwrap().contains("Cannot read dump"));
        assert!(t.job_store.load_checkpoint(&job_id).unwrap().is_some());
        assert!(t.controller.active_jobs().is_empty());
    }

    #[test]
    fn test_pause_resume_stop_transitions() {
        let t = create_test_controller(true);
        let job_id = t.controller.start(JobKind::AuthorEnrichment, FRESH).unwrap();

        t.controller.pause(&job_id).unwrap();
        assert_eq!(t.controller.status(&job_id).unwrap().status, JobStatus::Paused);
        assert!(t.controller.active_jobs().is_empty());
        assert!(matches!(
            t.controller.pause(&job_id).unwrap_err(),
            JobError::InvalidTransition {
                from: JobStatus::Paused,
                action: "pause"
            }
        ));
        assert!(matches!(
            t.controller.run(&job_id).unwrap_err(),
            JobError::InvalidTransition { action: "run", .. }
        ));

        t.controller.resume(&job_id).unwrap();
        assert_eq!(t.controller.status(&job_id).unwrap().status, JobStatus::Running);
        assert!(matches!(
            t.controller.resume(&job_id).unwrap_err(),
            JobError::AlreadyRunning(_)
        ));

        t.controller.stop(&job_id).unwrap();
        assert_eq!(t.controller.status(&job_id).unwrap().status, JobStatus::Stopped);
        assert!(matches!(
            t.controller.stop(&job_id).unwrap_err(),
            JobError::InvalidTransition {
                from: JobStatus::Stopped,
                action: "stop"
            }
        ));
        assert!(matches!(
            t.controller.resume(&job_id).unwrap_err(),
            JobError::InvalidTransition {
                from: JobStatus::Stopped,
                action: "resume"
            }
        ));
    }

    #[test]
    fn test_unknown_job() {
        let t = create_test_controller(true);
        assert!(matches!(
            t.controller.pause("missing").unwrap_err(),
            JobError::NotFound(_)
        ));
        assert!(matches!(
            t.controller.status("missing").unwrap_err(),
            JobError::NotFound(_)
        ));
    }

    #[test]
    fn test_resume_latest_inherits_checkpoint() {
        let t = create_test_controller(true);
        let first = t.controller.start(JobKind::AuthorEnrichment, FRESH).unwrap();
        let mut checkpoint = Checkpoint::initial(&first);
        checkpoint.line_offset = 42;
        checkpoint.byte_offset = Some(4200);
        checkpoint.counters.created = 7;
        t.job_store.save_checkpoint(&checkpoint).unwrap();
        t.controller.stop(&first).unwrap();

        let second = t
            .controller
            .start(JobKind::AuthorEnrichment, StartMode::ResumeLatest)
            .unwrap();
        let inherited = t.job_store.load_checkpoint(&second).unwrap().unwrap();
        assert_eq!(
            inherited,
            Checkpoint {
                job_id: second.clone(),
                ..checkpoint
            }
        );
    }
}
