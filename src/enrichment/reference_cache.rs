//! Reference key -> display value table, built from the reference dump.

use super::profile::EnrichmentProfile;
use super::progress::{caching_summary, overall_progress};
use crate::background_jobs::{JobContext, JobError};
use crate::dump::DumpReader;
use crate::job_store::{Checkpoint, Phase};
use crate::mapping_store::MappingStore;
use crate::metrics;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reference values, held in memory up to a limit and spilled to the
/// mapping store's `reference_values` table beyond it.
///
/// The first non-empty value seen for a key wins in both tiers.
pub struct ReferenceCache {
    namespace: &'static str,
    memory: HashMap<String, String>,
    spilled: usize,
    store: Arc<dyn MappingStore>,
}

impl ReferenceCache {
    /// Streams the reference dump from the start. Not checkpointed: an
    /// interrupted build is redone in full on resume.
    pub fn build(
        ctx: &JobContext,
        profile: &dyn EnrichmentProfile,
        checkpoint: &Checkpoint,
    ) -> Result<Self, JobError> {
        let path = &ctx.sources.reference_dump;
        let mut reader =
            DumpReader::open(path).map_err(|e| JobError::source_unreadable(path, e))?;
        let namespace = profile.namespace();
        let settings = &ctx.settings;
        // A job resumed mid-update keeps reporting the progress it had reached
        let report = checkpoint.phase != Phase::Updating;

        if report {
            ctx.report_progress(
                Phase::Caching,
                overall_progress(Phase::Caching, 0.0),
                &caching_summary(0, 0, &checkpoint.counters),
                &checkpoint.counters,
            )?;
        }
        ctx.mapping_store.clear_reference_values(namespace)?;
        info!(
            "[{}] Building reference cache from {:?} (in-memory limit {})",
            ctx.job_id, path, settings.reference_cache_max_entries
        );

        let mut cache = Self {
            namespace,
            memory: HashMap::new(),
            spilled: 0,
            store: ctx.mapping_store.clone(),
        };
        let mut pending: Vec<(String, String)> = Vec::new();
        let mut lines = 0u64;
        let mut dropped = 0u64;

        while let Some(line) = reader
            .next_line()
            .map_err(|e| JobError::source_unreadable(path, e))?
        {
            lines += 1;
            if lines % settings.liveness_interval_lines == 0 {
                ctx.ensure_live()?;
            }

            let record = match line.record {
                Ok(record) => record,
                Err(err) => {
                    dropped += 1;
                    metrics::record_line_dropped(ctx.kind.as_str(), err.kind());
                    debug!(
                        "[{}] Skipping reference dump line {}: {}",
                        ctx.job_id, line.line_number, err
                    );
                    continue;
                }
            };
            let Some((key, value)) = profile.extract_reference(&record) else {
                continue;
            };
            if cache.memory.contains_key(&key) {
                continue;
            }
            if cache.memory.len() < settings.reference_cache_max_entries {
                cache.memory.insert(key, value);
            } else {
                pending.push((key, value));
                if pending.len() >= settings.write_batch_size {
                    cache.spill(&mut pending)?;
                }
            }
        }
        cache.spill(&mut pending)?;
        metrics::record_lines_read(ctx.kind.as_str(), "reference", lines);
        metrics::set_reference_cache_entries(ctx.kind.as_str(), cache.memory.len(), cache.spilled);

        if dropped > 0 {
            warn!(
                "[{}] {} reference dump lines could not be parsed",
                ctx.job_id, dropped
            );
        }
        let summary = caching_summary(cache.len(), cache.spilled, &checkpoint.counters);
        info!("[{}] {}", ctx.job_id, summary);
        if report {
            ctx.report_progress(
                Phase::Caching,
                overall_progress(Phase::Caching, 1.0),
                &summary,
                &checkpoint.counters,
            )?;
        }
        Ok(cache)
    }

    fn spill(&mut self, pending: &mut Vec<(String, String)>) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        self.spilled += self
            .store
            .insert_reference_values_batch(self.namespace, pending)?;
        pending.clear();
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.memory.get(key) {
            return Ok(Some(value.clone()));
        }
        if self.spilled == 0 {
            return Ok(None);
        }
        self.store.get_reference_value(self.namespace, key)
    }

    fn len(&self) -> usize {
        self.memory.len() + self.spilled
    }
}
