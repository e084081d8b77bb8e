use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all enricher metrics
const PREFIX: &str = "enricher";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Dump reading
    pub static ref DUMP_LINES_READ_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_dump_lines_read_total"), "Dump lines read"),
        &["kind", "pass"]
    ).expect("Failed to create dump_lines_read_total metric");

    pub static ref DUMP_LINES_DROPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            format!("{PREFIX}_dump_lines_dropped_total"),
            "Dump lines skipped because they failed to parse"
        ),
        &["kind", "reason"]
    ).expect("Failed to create dump_lines_dropped_total metric");

    // Writes
    pub static ref MAPPINGS_INSERTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_mappings_inserted_total"), "Identifier mappings inserted"),
        &["kind"]
    ).expect("Failed to create mappings_inserted_total metric");

    pub static ref RECORDS_UPDATED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_records_updated_total"), "Primary-store records updated"),
        &["kind"]
    ).expect("Failed to create records_updated_total metric");

    pub static ref ROW_FALLBACK_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            format!("{PREFIX}_row_fallback_failures_total"),
            "Rows that failed individually after a batch write failed"
        ),
        &["kind", "target"]
    ).expect("Failed to create row_fallback_failures_total metric");

    pub static ref CHECKPOINTS_SAVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_checkpoints_saved_total"), "Checkpoints persisted"),
        &["kind", "phase"]
    ).expect("Failed to create checkpoints_saved_total metric");

    // Reference cache
    pub static ref REFERENCE_CACHE_ENTRIES: IntGaugeVec = IntGaugeVec::new(
        Opts::new(format!("{PREFIX}_reference_cache_entries"), "Reference cache size"),
        &["kind", "tier"]
    ).expect("Failed to create reference_cache_entries metric");

    // Jobs
    pub static ref JOB_RUNS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_job_runs_total"), "Job runs by outcome"),
        &["kind", "outcome"]
    ).expect("Failed to create job_runs_total metric");

    pub static ref PHASE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_phase_duration_seconds"),
            "Wall time spent in a job phase"
        )
        .buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 3.0 * 3600.0, 12.0 * 3600.0]),
        &["kind", "phase"]
    ).expect("Failed to create phase_duration_seconds metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(DUMP_LINES_READ_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DUMP_LINES_DROPPED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(MAPPINGS_INSERTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RECORDS_UPDATED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ROW_FALLBACK_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CHECKPOINTS_SAVED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REFERENCE_CACHE_ENTRIES.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PHASE_DURATION_SECONDS.clone()));

    tracing::debug!("Metrics system initialized");
}

pub fn record_lines_read(kind: &str, pass: &str, count: u64) {
    DUMP_LINES_READ_TOTAL
        .with_label_values(&[kind, pass])
        .inc_by(count);
}

pub fn record_line_dropped(kind: &str, reason: &str) {
    DUMP_LINES_DROPPED_TOTAL
        .with_label_values(&[kind, reason])
        .inc();
}

pub fn record_mappings_inserted(kind: &str, count: usize) {
    MAPPINGS_INSERTED_TOTAL
        .with_label_values(&[kind])
        .inc_by(count as u64);
}

pub fn record_records_updated(kind: &str, count: usize) {
    RECORDS_UPDATED_TOTAL
        .with_label_values(&[kind])
        .inc_by(count as u64);
}

pub fn record_row_fallback_failure(kind: &str, target: &str) {
    ROW_FALLBACK_FAILURES_TOTAL
        .with_label_values(&[kind, target])
        .inc();
}

pub fn record_checkpoint_saved(kind: &str, phase: &str) {
    CHECKPOINTS_SAVED_TOTAL
        .with_label_values(&[kind, phase])
        .inc();
}

pub fn set_reference_cache_entries(kind: &str, memory: usize, spilled: usize) {
    REFERENCE_CACHE_ENTRIES
        .with_label_values(&[kind, "memory"])
        .set(memory as i64);
    REFERENCE_CACHE_ENTRIES
        .with_label_values(&[kind, "spilled"])
        .set(spilled as i64);
}

pub fn record_job_run(kind: &str, outcome: &str) {
    JOB_RUNS_TOTAL.with_label_values(&[kind, outcome]).inc();
}

pub fn record_phase_duration(kind: &str, phase: &str, duration: Duration) {
    PHASE_DURATION_SECONDS
        .with_label_values(&[kind, phase])
        .observe(duration.as_secs_f64());
}

/// Text exposition of everything in the registry.
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => String::from_utf8(buffer).unwrap_or_default(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find_metric(name: &str) -> bool {
        REGISTRY.gather().iter().any(|m| m.get_name() == name)
    }

    #[test]
    fn test_metrics_initialization() {
        init_metrics();
        record_job_run("author", "completed");
        assert!(find_metric("enricher_job_runs_total"));
    }

    #[test]
    fn test_dump_metrics() {
        init_metrics();
        record_lines_read("author", "mapping", 10);
        record_line_dropped("author", "payload");
        assert!(find_metric("enricher_dump_lines_read_total"));
        assert!(find_metric("enricher_dump_lines_dropped_total"));
    }

    #[test]
    fn test_render_contains_recorded_values() {
        init_metrics();
        record_phase_duration("cover", "updating", Duration::from_secs(2));
        record_checkpoint_saved("cover", "updating");
        let text = render_metrics();
        assert!(text.contains("enricher_phase_duration_seconds"));
        assert!(text.contains("enricher_checkpoints_saved_total"));
    }
}
