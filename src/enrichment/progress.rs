//! Overall progress weighting, ETA and job summaries.

use crate::job_store::{Checkpoint, JobCounters, Phase};
use std::time::{Duration, Instant};

/// Share of overall progress each phase covers, as (start, end) percentages.
fn phase_span(phase: Phase) -> (f64, f64) {
    match phase {
        Phase::Mapping => (0.0, 50.0),
        Phase::Caching => (50.0, 55.0),
        Phase::Updating => (55.0, 100.0),
        Phase::Done => (100.0, 100.0),
    }
}

/// Maps a fraction of one phase onto the 0-100 overall scale.
pub fn overall_progress(phase: Phase, fraction: f64) -> f64 {
    let (start, end) = phase_span(phase);
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    start + (end - start) * fraction
}

/// Overall progress a checkpoint stands for. Mapping positions count as the
/// start of their phase, since the dump size is not known here.
pub fn checkpoint_progress(checkpoint: &Checkpoint) -> f64 {
    match (checkpoint.phase, checkpoint.total) {
        (Phase::Updating, Some(total)) => overall_progress(
            Phase::Updating,
            fraction(checkpoint.counters.processed, total),
        ),
        (phase, _) => overall_progress(phase, 0.0),
    }
}

pub fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    }
}

/// Rate-based ETA over the units handled since this process entered the phase.
///
/// Units done before a resume are excluded from the rate.
pub struct EtaEstimator {
    started: Instant,
    baseline: u64,
}

impl EtaEstimator {
    pub fn new(baseline: u64) -> Self {
        Self {
            started: Instant::now(),
            baseline,
        }
    }

    pub fn eta(&self, done: u64, total: u64) -> Option<Duration> {
        Self::estimate(self.started.elapsed(), self.baseline, done, total)
    }

    fn estimate(elapsed: Duration, baseline: u64, done: u64, total: u64) -> Option<Duration> {
        if done >= total {
            return Some(Duration::ZERO);
        }
        let progressed = done.saturating_sub(baseline);
        let secs = elapsed.as_secs_f64();
        if progressed == 0 || secs <= 0.0 {
            return None;
        }
        let rate = progressed as f64 / secs;
        Some(Duration::from_secs_f64((total - done) as f64 / rate))
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h{:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m{:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        Some(eta) => format!("ETA {}", format_duration(eta)),
        None => "ETA unknown".to_string(),
    }
}

pub fn mapping_summary(
    lines: u64,
    counters: &JobCounters,
    fraction: f64,
    eta: Option<Duration>,
) -> String {
    format!(
        "mapping: {} lines read ({:.1}% of dump), {} mappings created, {} lines dropped, {}",
        lines,
        fraction * 100.0,
        counters.created,
        counters.dropped,
        format_eta(eta)
    )
}

pub fn caching_summary(entries: usize, spilled: usize, counters: &JobCounters) -> String {
    format!(
        "caching: {} reference values ({} spilled to disk), {} mappings created, {} lines dropped",
        entries, spilled, counters.created, counters.dropped
    )
}

pub fn updating_summary(counters: &JobCounters, total: u64, eta: Option<Duration>) -> String {
    format!(
        "updating: {}/{} records processed, {} updated, {} mappings created, {} lines dropped, {}",
        counters.processed,
        total,
        counters.updated,
        counters.created,
        counters.dropped,
        format_eta(eta)
    )
}

/// One-line outcome used for final job summaries.
pub fn counters_summary(counters: &JobCounters) -> String {
    format!(
        "{} processed, {} updated, {} mappings created, {} lines dropped",
        counters.processed, counters.updated, counters.created, counters.dropped
    )
}
