//! Update pass: keyset scan over target records still missing the attribute.

use super::profile::EnrichmentProfile;
use super::progress::{fraction, overall_progress, updating_summary, EtaEstimator};
use super::reference_cache::ReferenceCache;
use crate::background_jobs::{JobAuditLogger, JobContext, JobError};
use crate::identifiers::{alternate_form, normalize_isbn};
use crate::job_store::{Checkpoint, Phase};
use crate::metrics;
use crate::target_store::TargetRecord;
use tracing::{debug, info, warn};

/// Pages between two audit progress entries.
const AUDIT_EVERY_PAGES: u64 = 100;

pub struct RecordUpdater<'a> {
    ctx: &'a JobContext,
    profile: &'a dyn EnrichmentProfile,
    cache: &'a ReferenceCache,
    audit: &'a JobAuditLogger,
}

impl<'a> RecordUpdater<'a> {
    pub fn new(
        ctx: &'a JobContext,
        profile: &'a dyn EnrichmentProfile,
        cache: &'a ReferenceCache,
        audit: &'a JobAuditLogger,
    ) -> Self {
        Self {
            ctx,
            profile,
            cache,
            audit,
        }
    }

    /// Pages through the target store from the checkpointed cursor.
    ///
    /// On first entry the number of records needing an update is stored in
    /// the checkpoint as the progress denominator.
    ///
    /// The checkpoint is saved after every page, before the liveness check,
    /// so an interrupt never loses an applied page.
    pub fn run(&self, checkpoint: &mut Checkpoint) -> Result<(), JobError> {
        let attribute = self.profile.attribute();
        let total = match (checkpoint.phase, checkpoint.total) {
            (Phase::Updating, Some(total)) => total,
            _ => {
                // Snapshot once; later runs of the job keep this denominator.
                let total = self.ctx.target_store.count_needing_update(attribute)?;
                checkpoint.phase = Phase::Updating;
                checkpoint.line_offset = 0;
                checkpoint.byte_offset = None;
                checkpoint.cursor = None;
                checkpoint.total = Some(total);
                self.ctx.save_checkpoint(checkpoint)?;
                info!("[{}] {} records need an update", self.ctx.job_id, total);
                total
            }
        };
        let batch_size = self.ctx.settings.update_batch_size;
        let eta = EtaEstimator::new(checkpoint.counters.processed);
        let mut pages = 0u64;

        info!(
            "[{}] Updating '{}' from cursor {:?} ({}/{} processed)",
            self.ctx.job_id,
            attribute.column(),
            checkpoint.cursor,
            checkpoint.counters.processed,
            total
        );

        loop {
            let after_id = checkpoint.cursor.unwrap_or(i64::MIN);
            let page = self
                .ctx
                .target_store
                .fetch_needing_update(attribute, after_id, batch_size)?;
            let Some(last) = page.last() else {
                break;
            };
            let last_id = last.id;

            let mut updates = Vec::new();
            for record in &page {
                if let Some(value) = self.resolve(record)? {
                    updates.push((record.id, value));
                }
            }
            let applied = self.apply(&updates);

            checkpoint.counters.processed += page.len() as u64;
            checkpoint.counters.updated += applied as u64;
            checkpoint.cursor = Some(last_id);
            self.ctx.save_checkpoint(checkpoint)?;
            metrics::record_records_updated(self.ctx.kind.as_str(), applied);

            let summary = updating_summary(
                &checkpoint.counters,
                total,
                eta.eta(checkpoint.counters.processed, total),
            );
            debug!(
                "[{}] Page ending at id {}: {} fetched, {} resolved, {} applied",
                self.ctx.job_id,
                last_id,
                page.len(),
                updates.len(),
                applied
            );
            self.ctx.report_progress(
                Phase::Updating,
                overall_progress(
                    Phase::Updating,
                    fraction(checkpoint.counters.processed, total),
                ),
                &summary,
                &checkpoint.counters,
            )?;
            pages += 1;
            if pages % AUDIT_EVERY_PAGES == 0 {
                info!("[{}] {}", self.ctx.job_id, summary);
                self.audit.log_progress(serde_json::json!({
                    "phase": Phase::Updating.as_str(),
                    "cursor": last_id,
                    "processed": checkpoint.counters.processed,
                    "updated": checkpoint.counters.updated,
                    "total": total,
                }));
            }

            self.ctx.ensure_live()?;
        }

        checkpoint.phase = Phase::Done;
        self.ctx.save_checkpoint(checkpoint)?;
        info!(
            "[{}] Update pass complete: {}",
            self.ctx.job_id,
            updating_summary(&checkpoint.counters, total, None)
        );
        Ok(())
    }

    /// Value to write for `record`, if its identifier resolves to anything.
    fn resolve(&self, record: &TargetRecord) -> Result<Option<String>, JobError> {
        let Some(isbn) = record.isbn.as_deref().and_then(normalize_isbn) else {
            return Ok(None);
        };
        let namespace = self.profile.namespace();
        let store = &self.ctx.mapping_store;

        let keys = match store.lookup(namespace, &isbn)? {
            Some(keys) => keys,
            None => match alternate_form(&isbn) {
                Some(alternate) => match store.lookup(namespace, &alternate)? {
                    Some(keys) => keys,
                    None => return Ok(None),
                },
                None => return Ok(None),
            },
        };

        let mut values: Vec<String> = Vec::new();
        for key in &keys {
            if let Some(value) = self.cache.get(key)? {
                let value = value.trim();
                if !value.is_empty() && !values.iter().any(|v| v == value) {
                    values.push(value.to_string());
                }
            }
        }
        Ok(self.profile.join_values(&values))
    }

    /// Applies a page of updates atomically, retrying row by row if the
    /// batch fails. Rows that still fail are logged and left missing.
    fn apply(&self, updates: &[(i64, String)]) -> usize {
        if updates.is_empty() {
            return 0;
        }
        let attribute = self.profile.attribute();
        let store = &self.ctx.target_store;
        match store.apply_updates(attribute, updates) {
            Ok(applied) => applied,
            Err(e) => {
                warn!(
                    "[{}] Batch update of {} records failed, retrying row by row: {:#}",
                    self.ctx.job_id,
                    updates.len(),
                    e
                );
                let mut applied = 0;
                for (id, value) in updates {
                    match store.update_one(attribute, *id, value) {
                        Ok(true) => applied += 1,
                        Ok(false) => {}
                        Err(e) => {
                            warn!(
                                "[{}] Failed to update record {}: {:#}",
                                self.ctx.job_id, id, e
                            );
                            metrics::record_row_fallback_failure(
                                self.ctx.kind.as_str(),
                                "record",
                            );
                        }
                    }
                }
                applied
            }
        }
    }
}
