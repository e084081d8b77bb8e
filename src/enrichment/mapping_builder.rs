//! Mapping pass: streams the mapping dump into the identifier mapping store.

use super::profile::EnrichmentProfile;
use super::progress::{fraction, mapping_summary, overall_progress, EtaEstimator};
use crate::background_jobs::{JobAuditLogger, JobContext, JobError};
use crate::dump::{DumpParseError, DumpReader, StreamPosition};
use crate::job_store::{Checkpoint, Phase};
use crate::mapping_store::{CompletionMarker, IdentifierMapping};
use crate::metrics;
use anyhow::Context;
use tracing::{debug, info, warn};

/// Dropped lines logged individually per run; later ones are only counted.
const MAX_DROPPED_WARNINGS: u64 = 10;

pub struct MappingBuilder<'a> {
    ctx: &'a JobContext,
    profile: &'a dyn EnrichmentProfile,
    audit: &'a JobAuditLogger,
    dropped_this_run: u64,
    unreported_lines: u64,
}

impl<'a> MappingBuilder<'a> {
    pub fn new(
        ctx: &'a JobContext,
        profile: &'a dyn EnrichmentProfile,
        audit: &'a JobAuditLogger,
    ) -> Self {
        Self {
            ctx,
            profile,
            audit,
            dropped_this_run: 0,
            unreported_lines: 0,
        }
    }

    /// Runs the pass from the checkpointed position to the end of the dump.
    ///
    /// On success the namespace is marked complete and the checkpoint moves to
    /// the caching phase. On `Interrupted` the buffered mappings are flushed and
    /// the position is checkpointed before returning. Other errors leave the
    /// last saved checkpoint untouched.
    pub fn run(&mut self, checkpoint: &mut Checkpoint) -> Result<(), JobError> {
        let path = self.ctx.sources.mapping_dump.clone();
        let mut reader =
            DumpReader::open(&path).map_err(|e| JobError::source_unreadable(&path, e))?;
        reader
            .resume_at(StreamPosition {
                line_offset: checkpoint.line_offset,
                byte_offset: checkpoint.byte_offset,
            })
            .map_err(|e| JobError::source_unreadable(&path, e))?;

        info!(
            "[{}] Mapping pass over {:?} starting at line {} (compressed: {})",
            self.ctx.job_id,
            path,
            checkpoint.line_offset,
            reader.is_compressed()
        );

        let mut buffer = Vec::with_capacity(self.ctx.settings.write_batch_size);
        let eta = EtaEstimator::new(reader.source_bytes_read());

        match self.stream(&mut reader, &mut buffer, checkpoint, &eta) {
            Ok(()) => {}
            Err(JobError::Interrupted(reason)) => {
                self.flush(&mut buffer, checkpoint);
                self.save_position(&reader, checkpoint)?;
                info!(
                    "[{}] Mapping pass interrupted ({}) at line {}",
                    self.ctx.job_id, reason, checkpoint.line_offset
                );
                return Err(JobError::Interrupted(reason));
            }
            Err(e) => return Err(e),
        }

        self.flush(&mut buffer, checkpoint);
        self.save_position(&reader, checkpoint)?;
        self.report_dropped_total(checkpoint);
        self.complete(checkpoint)
    }

    fn stream(
        &mut self,
        reader: &mut DumpReader,
        buffer: &mut Vec<IdentifierMapping>,
        checkpoint: &mut Checkpoint,
        eta: &EtaEstimator,
    ) -> Result<(), JobError> {
        let ctx = self.ctx;
        let settings = &ctx.settings;
        let mut since_liveness = 0u64;
        let mut since_checkpoint = 0u64;

        while let Some(line) = reader
            .next_line()
            .map_err(|e| JobError::source_unreadable(reader.path(), e))?
        {
            self.unreported_lines += 1;
            match line.record {
                Ok(record) => self.profile.extract_mappings(&record, buffer),
                Err(err) => self.drop_line(checkpoint, line.line_number, &err),
            }

            since_liveness += 1;
            if buffer.len() >= settings.write_batch_size {
                self.flush(buffer, checkpoint);
                ctx.ensure_live()?;
                since_liveness = 0;
            } else if since_liveness >= settings.liveness_interval_lines {
                ctx.ensure_live()?;
                since_liveness = 0;
            }

            since_checkpoint += 1;
            if since_checkpoint >= settings.checkpoint_interval_lines {
                self.flush(buffer, checkpoint);
                self.save_position(reader, checkpoint)?;
                self.report(reader, checkpoint, eta)?;
                since_checkpoint = 0;
            }
        }
        Ok(())
    }

    fn drop_line(&mut self, checkpoint: &mut Checkpoint, line_number: u64, err: &DumpParseError) {
        checkpoint.counters.dropped += 1;
        self.dropped_this_run += 1;
        metrics::record_line_dropped(self.ctx.kind.as_str(), err.kind());
        if self.dropped_this_run <= MAX_DROPPED_WARNINGS {
            warn!(
                "[{}] Dropping mapping dump line {}: {}",
                self.ctx.job_id, line_number, err
            );
        } else {
            debug!(
                "[{}] Dropping mapping dump line {}: {}",
                self.ctx.job_id, line_number, err
            );
        }
    }

    fn report_dropped_total(&self, checkpoint: &Checkpoint) {
        if self.dropped_this_run > MAX_DROPPED_WARNINGS {
            warn!(
                "[{}] {} mapping dump lines dropped in this run ({} in total for the job)",
                self.ctx.job_id, self.dropped_this_run, checkpoint.counters.dropped
            );
        }
    }

    /// Writes the buffered mappings, falling back to one row at a time if
    /// the batch fails. Rows that still fail are logged and skipped.
    fn flush(&self, buffer: &mut Vec<IdentifierMapping>, checkpoint: &mut Checkpoint) {
        if buffer.is_empty() {
            return;
        }
        let namespace = self.profile.namespace();
        let inserted = match self
            .ctx
            .mapping_store
            .insert_mappings_batch(namespace, buffer)
        {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!(
                    "[{}] Batch insert of {} mappings failed, retrying row by row: {:#}",
                    self.ctx.job_id,
                    buffer.len(),
                    e
                );
                self.insert_rows(buffer)
            }
        };
        debug!(
            "[{}] Flushed {} mappings ({} new)",
            self.ctx.job_id,
            buffer.len(),
            inserted
        );
        checkpoint.counters.created += inserted as u64;
        metrics::record_mappings_inserted(self.ctx.kind.as_str(), inserted);
        buffer.clear();
    }

    fn insert_rows(&self, buffer: &[IdentifierMapping]) -> usize {
        let namespace = self.profile.namespace();
        let mut inserted = 0;
        for mapping in buffer {
            match self.ctx.mapping_store.insert_mapping(namespace, mapping) {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        "[{}] Failed to insert mapping for {}: {:#}",
                        self.ctx.job_id, mapping.identifier, e
                    );
                    metrics::record_row_fallback_failure(self.ctx.kind.as_str(), "mapping");
                }
            }
        }
        inserted
    }

    fn save_position(
        &mut self,
        reader: &DumpReader,
        checkpoint: &mut Checkpoint,
    ) -> Result<(), JobError> {
        let position = reader.position();
        checkpoint.phase = Phase::Mapping;
        checkpoint.line_offset = position.line_offset;
        checkpoint.byte_offset = position.byte_offset;
        self.ctx.save_checkpoint(checkpoint)?;

        metrics::record_lines_read(self.ctx.kind.as_str(), "mapping", self.unreported_lines);
        self.unreported_lines = 0;
        Ok(())
    }

    fn report(
        &self,
        reader: &DumpReader,
        checkpoint: &Checkpoint,
        eta: &EtaEstimator,
    ) -> Result<(), JobError> {
        let done = reader.source_bytes_read();
        let total = reader.total_bytes();
        let fraction = fraction(done, total);
        let summary = mapping_summary(
            checkpoint.line_offset,
            &checkpoint.counters,
            fraction,
            eta.eta(done, total),
        );
        info!("[{}] {}", self.ctx.job_id, summary);
        self.ctx.report_progress(
            Phase::Mapping,
            overall_progress(Phase::Mapping, fraction),
            &summary,
            &checkpoint.counters,
        )?;
        self.audit.log_progress(serde_json::json!({
            "phase": Phase::Mapping.as_str(),
            "line_offset": checkpoint.line_offset,
            "created": checkpoint.counters.created,
            "dropped": checkpoint.counters.dropped,
        }));
        Ok(())
    }

    fn complete(&self, checkpoint: &mut Checkpoint) -> Result<(), JobError> {
        let namespace = self.profile.namespace();
        let marker = CompletionMarker {
            job_id: self.ctx.job_id.clone(),
            lines: checkpoint.line_offset,
            mappings: self.ctx.mapping_store.count_mappings(namespace)?,
            completed_at: chrono::Utc::now().to_rfc3339(),
        };
        let detail =
            serde_json::to_string(&marker).context("Failed to serialize completion marker")?;
        self.ctx.mapping_store.mark_complete(namespace, &detail)?;

        info!(
            "[{}] Mapping pass complete: {} lines, {} mappings in '{}', {} lines dropped",
            self.ctx.job_id,
            marker.lines,
            marker.mappings,
            namespace,
            checkpoint.counters.dropped
        );

        checkpoint.phase = Phase::Caching;
        checkpoint.line_offset = 0;
        checkpoint.byte_offset = None;
        self.ctx.save_checkpoint(checkpoint)?;
        self.ctx.report_progress(
            Phase::Caching,
            overall_progress(Phase::Caching, 0.0),
            &mapping_summary(marker.lines, &checkpoint.counters, 1.0, None),
            &checkpoint.counters,
        )?;
        Ok(())
    }
}
