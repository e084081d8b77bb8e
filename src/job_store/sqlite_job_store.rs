use super::models::{
    Checkpoint, InheritedCheckpoint, JobAuditEntry, JobAuditEventType, JobCounters, JobKind,
    JobRecord, JobStatus, Phase,
};
use super::schema::JOBS_VERSIONED_SCHEMAS;
use super::JobStore;
use crate::sqlite_persistence::open_versioned_db;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const JOB_COLUMNS: &str = "id, kind, status, phase, progress, summary, processed, created, \
     updated, dropped, started_at, updated_at, finished_at";

const CHECKPOINT_COLUMNS: &str = "job_id, phase, line_offset, byte_offset, cursor, total, \
     processed, created, updated, dropped";

pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path.as_ref(), JOBS_VERSIONED_SCHEMAS, "jobs")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn status_list(statuses: &[JobStatus]) -> String {
        statuses
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn row_to_counters(row: &rusqlite::Row) -> rusqlite::Result<JobCounters> {
        Ok(JobCounters {
            processed: row.get::<_, i64>("processed")? as u64,
            created: row.get::<_, i64>("created")? as u64,
            updated: row.get::<_, i64>("updated")? as u64,
            dropped: row.get::<_, i64>("dropped")? as u64,
        })
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let kind_str: String = row.get("kind")?;
        let status_str: String = row.get("status")?;
        let phase_str: String = row.get("phase")?;
        let started_at_str: String = row.get("started_at")?;
        let updated_at_str: String = row.get("updated_at")?;
        let finished_at_str: Option<String> = row.get("finished_at")?;

        Ok(JobRecord {
            id: row.get("id")?,
            kind: JobKind::parse(&kind_str).unwrap_or(JobKind::AuthorEnrichment),
            status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Failed),
            phase: Phase::parse(&phase_str).unwrap_or(Phase::Mapping),
            progress: row.get("progress")?,
            summary: row.get("summary")?,
            counters: Self::row_to_counters(row)?,
            started_at: Self::parse_datetime(&started_at_str),
            updated_at: Self::parse_datetime(&updated_at_str),
            finished_at: finished_at_str.map(|s| Self::parse_datetime(&s)),
        })
    }

    fn row_to_checkpoint(row: &rusqlite::Row) -> rusqlite::Result<Checkpoint> {
        let phase_str: String = row.get("phase")?;
        Ok(Checkpoint {
            job_id: row.get("job_id")?,
            phase: Phase::parse(&phase_str).unwrap_or(Phase::Mapping),
            line_offset: row.get::<_, i64>("line_offset")? as u64,
            byte_offset: row.get::<_, Option<i64>>("byte_offset")?.map(|b| b as u64),
            cursor: row.get("cursor")?,
            total: row.get::<_, Option<i64>>("total")?.map(|t| t as u64),
            counters: Self::row_to_counters(row)?,
        })
    }

    fn row_to_audit_entry(row: &rusqlite::Row) -> rusqlite::Result<JobAuditEntry> {
        let event_type_str: String = row.get("event_type")?;
        let event_type =
            JobAuditEventType::parse(&event_type_str).unwrap_or(JobAuditEventType::Progress);
        let timestamp_str: String = row.get("timestamp")?;
        let details_str: Option<String> = row.get("details")?;

        Ok(JobAuditEntry {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            event_type,
            timestamp: Self::parse_datetime(&timestamp_str).timestamp(),
            duration_ms: row.get("duration_ms")?,
            details: details_str.and_then(|s| serde_json::from_str(&s).ok()),
            error: row.get("error")?,
        })
    }

    /// Stops every `running` row of `kind` other than `keep_id`.
    fn stop_ghosts(conn: &Connection, kind: JobKind, keep_id: &str, now: &str) -> Result<usize> {
        let count = conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2, finished_at = ?2,
                 summary = 'Stopped: no live process owned this job when ' || ?3 || ' started'
             WHERE kind = ?4 AND status = ?5 AND id != ?3",
            params![
                JobStatus::Stopped.as_str(),
                now,
                keep_id,
                kind.as_str(),
                JobStatus::Running.as_str()
            ],
        )?;
        Ok(count)
    }

    fn upsert_checkpoint(conn: &Connection, checkpoint: &Checkpoint, now: &str) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO checkpoints ({}, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(job_id) DO UPDATE SET
                     phase = excluded.phase,
                     line_offset = excluded.line_offset,
                     byte_offset = excluded.byte_offset,
                     cursor = excluded.cursor,
                     total = excluded.total,
                     processed = excluded.processed,
                     created = excluded.created,
                     updated = excluded.updated,
                     dropped = excluded.dropped,
                     updated_at = excluded.updated_at",
                CHECKPOINT_COLUMNS
            ),
            params![
                checkpoint.job_id,
                checkpoint.phase.as_str(),
                checkpoint.line_offset as i64,
                checkpoint.byte_offset.map(|b| b as i64),
                checkpoint.cursor,
                checkpoint.total.map(|t| t as i64),
                checkpoint.counters.processed as i64,
                checkpoint.counters.created as i64,
                checkpoint.counters.updated as i64,
                checkpoint.counters.dropped as i64,
                now,
            ],
        )?;
        Ok(())
    }
}

impl JobStore for SqliteJobStore {
    fn create_job(&self, job: &JobRecord) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        let tx = conn.transaction()?;

        let ghosts = Self::stop_ghosts(&tx, job.kind, &job.id, &now)?;
        tx.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.kind.as_str(),
                job.status.as_str(),
                job.phase.as_str(),
                job.progress,
                job.summary,
                job.counters.processed as i64,
                job.counters.created as i64,
                job.counters.updated as i64,
                job.counters.dropped as i64,
                Self::format_datetime(&job.started_at),
                now,
                job.finished_at.as_ref().map(Self::format_datetime),
            ],
        )?;
        tx.commit()?;

        if ghosts > 0 {
            info!(
                "Stopped {} ghost {} job(s) while creating {}",
                ghosts,
                job.kind.as_str(),
                job.id
            );
        }
        Ok(ghosts)
    }

    fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn get_job_status(&self, id: &str) -> Result<Option<JobStatus>> {
        let conn = self.conn.lock().unwrap();
        let status: Option<String> = conn
            .query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(status.and_then(|s| JobStatus::parse(&s)))
    }

    fn list_jobs(&self, kind: Option<JobKind>, limit: usize) -> Result<Vec<JobRecord>> {
        let conn = self.conn.lock().unwrap();
        let jobs = match kind {
            Some(kind) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM jobs WHERE kind = ?1 ORDER BY started_at DESC LIMIT ?2",
                    JOB_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![kind.as_str(), limit as i64], Self::row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM jobs ORDER BY started_at DESC LIMIT ?1",
                    JOB_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![limit as i64], Self::row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(jobs)
    }

    fn resume_job(&self, id: &str) -> Result<Option<usize>> {
        let mut conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        let tx = conn.transaction()?;

        let kind_str: Option<String> = tx
            .query_row(
                "SELECT kind FROM jobs WHERE id = ?1 AND status = ?2",
                params![id, JobStatus::Paused.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        let Some(kind) = kind_str.as_deref().and_then(JobKind::parse) else {
            return Ok(None);
        };

        let ghosts = Self::stop_ghosts(&tx, kind, id, &now)?;
        tx.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2, finished_at = NULL WHERE id = ?3",
            params![JobStatus::Running.as_str(), now, id],
        )?;
        tx.commit()?;
        Ok(Some(ghosts))
    }

    fn transition_job_status(&self, id: &str, from: &[JobStatus], to: JobStatus) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        let finished_at = to.is_terminal().then(|| now.clone());

        let changed = conn.execute(
            &format!(
                "UPDATE jobs SET status = ?1, updated_at = ?2, finished_at = ?3
                 WHERE id = ?4 AND status IN ({})",
                Self::status_list(from)
            ),
            params![to.as_str(), now, finished_at, id],
        )?;
        Ok(changed > 0)
    }

    fn finish_job(&self, id: &str, status: JobStatus, summary: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        let finished_at = status.is_terminal().then(|| now.clone());

        conn.execute(
            "UPDATE jobs SET status = ?1, summary = ?2, updated_at = ?3, finished_at = ?4
             WHERE id = ?5",
            params![status.as_str(), summary, now, finished_at, id],
        )?;
        Ok(())
    }

    fn update_job_progress(
        &self,
        id: &str,
        phase: Phase,
        progress: f64,
        summary: &str,
        counters: &JobCounters,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "UPDATE jobs SET phase = ?1, progress = ?2, summary = ?3, processed = ?4,
                 created = ?5, updated = ?6, dropped = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                phase.as_str(),
                progress,
                summary,
                counters.processed as i64,
                counters.created as i64,
                counters.updated as i64,
                counters.dropped as i64,
                now,
                id
            ],
        )?;
        Ok(())
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        Self::upsert_checkpoint(&conn, checkpoint, &now)?;
        debug!(
            "Saved checkpoint for {}: phase={} line={} cursor={:?}",
            checkpoint.job_id,
            checkpoint.phase.as_str(),
            checkpoint.line_offset,
            checkpoint.cursor
        );
        Ok(())
    }

    fn load_checkpoint(&self, job_id: &str) -> Result<Option<Checkpoint>> {
        let conn = self.conn.lock().unwrap();
        let checkpoint = conn
            .query_row(
                &format!(
                    "SELECT {} FROM checkpoints WHERE job_id = ?1",
                    CHECKPOINT_COLUMNS
                ),
                params![job_id],
                Self::row_to_checkpoint,
            )
            .optional()?;
        Ok(checkpoint)
    }

    fn clear_checkpoint(&self, job_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM checkpoints WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(())
    }

    fn take_resumable_checkpoint(
        &self,
        kind: JobKind,
        job_id: &str,
    ) -> Result<Option<InheritedCheckpoint>> {
        let mut conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        let tx = conn.transaction()?;

        let columns = CHECKPOINT_COLUMNS
            .split(", ")
            .map(|c| format!("c.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let found = tx
            .query_row(
                &format!(
                    "SELECT {}, j.status AS source_status
                     FROM checkpoints c JOIN jobs j ON j.id = c.job_id
                     WHERE j.kind = ?1 AND j.id != ?2 AND j.status IN ({})
                       AND NOT EXISTS (
                           SELECT 1 FROM jobs d
                           WHERE d.kind = j.kind AND d.status = ?3 AND d.rowid > j.rowid
                       )
                     ORDER BY c.updated_at DESC, j.rowid DESC LIMIT 1",
                    columns,
                    Self::status_list(&[JobStatus::Paused, JobStatus::Stopped, JobStatus::Failed])
                ),
                params![kind.as_str(), job_id, JobStatus::Completed.as_str()],
                |row| {
                    let status_str: String = row.get("source_status")?;
                    Ok((
                        Self::row_to_checkpoint(row)?,
                        JobStatus::parse(&status_str).unwrap_or(JobStatus::Stopped),
                    ))
                },
            )
            .optional()?;
        let Some((source, from_status)) = found else {
            return Ok(None);
        };

        let checkpoint = Checkpoint {
            job_id: job_id.to_string(),
            ..source.clone()
        };
        Self::upsert_checkpoint(&tx, &checkpoint, &now)?;
        tx.execute(
            "DELETE FROM checkpoints WHERE job_id = ?1",
            params![source.job_id],
        )?;
        if from_status == JobStatus::Paused {
            tx.execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2, finished_at = ?2,
                     summary = 'Stopped: job ' || ?3 || ' took over its checkpoint'
                 WHERE id = ?4 AND status = ?5",
                params![
                    JobStatus::Stopped.as_str(),
                    now,
                    job_id,
                    source.job_id,
                    JobStatus::Paused.as_str()
                ],
            )?;
        }
        tx.commit()?;

        info!(
            "Moved the {} checkpoint of {} job {} to {}",
            checkpoint.phase.as_str(),
            from_status.as_str(),
            source.job_id,
            job_id
        );
        Ok(Some(InheritedCheckpoint {
            from_job_id: source.job_id,
            from_status,
            checkpoint,
        }))
    }

    fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        let details_str = details.map(|d| d.to_string());

        conn.execute(
            "INSERT INTO job_audit_log (job_id, event_type, timestamp, duration_ms, details, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job_id,
                event_type.as_str(),
                now,
                duration_ms,
                details_str,
                error
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get_job_audit_log_by_job(&self, job_id: &str, limit: usize) -> Result<Vec<JobAuditEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, event_type, timestamp, duration_ms, details, error
             FROM job_audit_log
             WHERE job_id = ?1
             ORDER BY id ASC
             LIMIT ?2",
        )?;

        let entries = stmt
            .query_map(params![job_id, limit as i64], Self::row_to_audit_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }
}
