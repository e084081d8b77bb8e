//! Enrichment job lifecycle: control, execution context and audit trail.

pub mod audit_logger;
pub mod context;
pub mod controller;
pub mod job;

pub use audit_logger::JobAuditLogger;
pub use context::{JobContext, JobSources, StopSignal};
pub use controller::JobController;
pub use job::{JobError, StartMode, StopReason};
