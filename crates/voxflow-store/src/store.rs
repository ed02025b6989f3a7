use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{info, warn};

use voxflow_types::{Job, JobStatus, StageResult, StageStatus};

use crate::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id              TEXT PRIMARY KEY,
    profile_id      TEXT NOT NULL,
    source_path     TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('QUEUED', 'PROCESSING', 'COMPLETE', 'FAILED', 'CANCELLED')),
    current_stage   TEXT,
    created_at      TEXT NOT NULL,
    completed_at    TEXT,
    priority        INTEGER NOT NULL DEFAULT 5,
    cost_estimate   REAL NOT NULL DEFAULT 0,
    error           TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_queue ON jobs(status, priority, created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_profile ON jobs(profile_id);

CREATE TABLE IF NOT EXISTS stage_results (
    job_id          TEXT NOT NULL REFERENCES jobs(id),
    stage_id        TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('PENDING', 'RUNNING', 'COMPLETE', 'FAILED')),
    started_at      TEXT,
    completed_at    TEXT,
    model_used      TEXT,
    input_tokens    INTEGER NOT NULL DEFAULT 0,
    output_tokens   INTEGER NOT NULL DEFAULT 0,
    cost_estimate   REAL NOT NULL DEFAULT 0,
    output_path     TEXT,
    error           TEXT,
    PRIMARY KEY (job_id, stage_id)
);
"#;

/// Partial update applied to a `(job_id, stage_id)` row.
///
/// `None` fields keep their stored value, so a RUNNING transition does not
/// erase token counts written by an earlier completed attempt.
#[derive(Debug, Clone, Default)]
pub struct StageUpdate {
    pub model_used: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub cost_estimate: Option<f64>,
    pub output_path: Option<String>,
    pub error: Option<String>,
}

/// Filters for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub profile_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// One page of a job listing plus the unpaginated total.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: i64,
}

/// Sqlite-backed store for jobs and stage results.
///
/// The connection is serialized behind a mutex; sqlite with WAL and a busy
/// timeout handles the rest. All callers share one instance.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    /// Open (or create) the store at the given path.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sqlite` if the database cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store, used by tests.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sqlite` on schema failure.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means another thread panicked mid-query; the
        // connection itself is still usable.
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert a new QUEUED job.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` when the id already exists.
    pub fn enqueue(&self, job: &Job) -> Result<(), StoreError> {
        let conn = self.lock();
        let result = conn.execute(
            "INSERT INTO jobs (id, profile_id, source_path, status, current_stage, created_at,
                               completed_at, priority, cost_estimate, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.id,
                job.profile_id,
                job.source_path,
                job.status.as_str(),
                job.current_stage,
                format_ts(job.created_at),
                job.completed_at.map(format_ts),
                job.priority,
                job.cost_estimate,
                job.error,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict { id: job.id.clone() })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically claim the next QUEUED job, transitioning it to PROCESSING.
    ///
    /// Ordering is `(priority ASC, created_at ASC)`; ties on priority go to
    /// the older job. Returns `None` when the queue is empty. Concurrent
    /// claimers never receive the same job: the select and update run in one
    /// immediate transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sqlite` on database failure.
    pub fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<String> = tx
            .query_row(
                "SELECT id FROM jobs WHERE status = 'QUEUED'
                 ORDER BY priority ASC, created_at ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE jobs SET status = 'PROCESSING' WHERE id = ?1 AND status = 'QUEUED'",
            params![id],
        )?;
        let job = tx.query_row("SELECT * FROM jobs WHERE id = ?1", params![id], job_from_row)??;
        tx.commit()?;
        Ok(Some(job))
    }

    /// Fetch a job by id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sqlite` on database failure.
    pub fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], job_from_row)
            .optional()?;
        row.transpose()
    }

    /// Fetch one stage row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sqlite` on database failure.
    pub fn get_stage(&self, job_id: &str, stage_id: &str) -> Result<Option<StageResult>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT * FROM stage_results WHERE job_id = ?1 AND stage_id = ?2",
                params![job_id, stage_id],
                stage_from_row,
            )
            .optional()?;
        row.transpose()
    }

    /// Create-or-update a stage row and the owning job's `current_stage` in
    /// one transaction. `RUNNING` stamps `started_at`; `COMPLETE`/`FAILED`
    /// stamp `completed_at`. Completing a stage recomputes the job's
    /// `cost_estimate` as the sum over its COMPLETE stages, which keeps the
    /// cost invariant true even when a retried stage overwrites an earlier
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` when the job does not exist.
    pub fn upsert_stage(
        &self,
        job_id: &str,
        stage_id: &str,
        status: StageStatus,
        update: StageUpdate,
    ) -> Result<StageResult, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM jobs WHERE id = ?1", params![job_id], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound {
                id: job_id.to_string(),
            });
        }

        tx.execute(
            "INSERT INTO stage_results (job_id, stage_id, status)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id, stage_id) DO NOTHING",
            params![job_id, stage_id, StageStatus::Pending.as_str()],
        )?;

        let now = format_ts(Utc::now());
        let started_at = matches!(status, StageStatus::Running).then(|| now.clone());
        let completed_at =
            matches!(status, StageStatus::Complete | StageStatus::Failed).then(|| now.clone());

        tx.execute(
            "UPDATE stage_results SET
                 status = ?3,
                 started_at = COALESCE(?4, started_at),
                 completed_at = COALESCE(?5, completed_at),
                 model_used = COALESCE(?6, model_used),
                 input_tokens = COALESCE(?7, input_tokens),
                 output_tokens = COALESCE(?8, output_tokens),
                 cost_estimate = COALESCE(?9, cost_estimate),
                 output_path = COALESCE(?10, output_path),
                 error = COALESCE(?11, error)
             WHERE job_id = ?1 AND stage_id = ?2",
            params![
                job_id,
                stage_id,
                status.as_str(),
                started_at,
                completed_at,
                update.model_used,
                update.input_tokens,
                update.output_tokens,
                update.cost_estimate,
                update.output_path,
                update.error,
            ],
        )?;

        tx.execute(
            "UPDATE jobs SET current_stage = ?2 WHERE id = ?1",
            params![job_id, stage_id],
        )?;

        if status == StageStatus::Complete {
            tx.execute(
                "UPDATE jobs SET cost_estimate = (
                     SELECT COALESCE(SUM(cost_estimate), 0) FROM stage_results
                     WHERE job_id = ?1 AND status = 'COMPLETE'
                 ) WHERE id = ?1",
                params![job_id],
            )?;
        }

        let row = tx.query_row(
            "SELECT * FROM stage_results WHERE job_id = ?1 AND stage_id = ?2",
            params![job_id, stage_id],
            stage_from_row,
        )??;
        tx.commit()?;
        Ok(row)
    }

    /// Terminal transition for a job.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyTerminal` when the job already reached a
    /// terminal status, `StoreError::NotFound` when it does not exist.
    pub fn finalize_job(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Job, StoreError> {
        debug_assert!(status.is_terminal());
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = current_status(&tx, id)?;
        if current.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                id: id.to_string(),
                status: current,
            });
        }

        tx.execute(
            "UPDATE jobs SET status = ?2, completed_at = ?3, error = ?4 WHERE id = ?1",
            params![id, status.as_str(), format_ts(Utc::now()), error],
        )?;
        let job = tx.query_row("SELECT * FROM jobs WHERE id = ?1", params![id], job_from_row)??;
        tx.commit()?;
        info!(job_id = id, status = %status, "job finalized");
        Ok(job)
    }

    /// Mark a QUEUED/PROCESSING job CANCELLED. Returns the previous status.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyTerminal` for jobs already terminal.
    pub fn cancel(&self, id: &str) -> Result<JobStatus, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = current_status(&tx, id)?;
        if current.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                id: id.to_string(),
                status: current,
            });
        }

        tx.execute(
            "UPDATE jobs SET status = 'CANCELLED', completed_at = ?2
             WHERE id = ?1 AND status IN ('QUEUED', 'PROCESSING')",
            params![id, format_ts(Utc::now())],
        )?;
        tx.commit()?;
        Ok(current)
    }

    /// Current status of a job, polled by the runner between stages.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` when the job does not exist.
    pub fn job_status(&self, id: &str) -> Result<JobStatus, StoreError> {
        let conn = self.lock();
        let status: Option<String> = conn
            .query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        match status {
            Some(s) => parse_job_status(&s),
            None => Err(StoreError::NotFound { id: id.to_string() }),
        }
    }

    /// Requeue jobs stranded in PROCESSING by a dead worker. Stage rows are
    /// kept so the next claim resumes from the first incomplete stage.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sqlite` on database failure.
    pub fn reset_orphans(&self) -> Result<usize, StoreError> {
        let conn = self.lock();
        let count = conn.execute(
            "UPDATE jobs SET status = 'QUEUED' WHERE status = 'PROCESSING'",
            [],
        )?;
        if count > 0 {
            warn!(count, "reset orphaned jobs back to QUEUED");
        }
        Ok(count)
    }

    /// List jobs ordered by `created_at DESC` with filters and pagination.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sqlite` on database failure.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<JobPage, StoreError> {
        let mut where_clauses = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(status) = filter.status {
            where_clauses.push(format!("status = ?{}", args.len() + 1));
            args.push(status.as_str().to_string());
        }
        if let Some(profile) = &filter.profile_id {
            where_clauses.push(format!("profile_id = ?{}", args.len() + 1));
            args.push(profile.clone());
        }
        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let conn = self.lock();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM jobs {where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        let sql = format!(
            "SELECT * FROM jobs {where_sql} ORDER BY created_at DESC LIMIT {limit} OFFSET {}",
            filter.offset.max(0)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), job_from_row)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row??);
        }
        Ok(JobPage { jobs, total })
    }

    /// All stage rows for a job, in execution order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sqlite` on database failure.
    pub fn stage_results(&self, job_id: &str) -> Result<Vec<StageResult>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM stage_results WHERE job_id = ?1
             ORDER BY started_at ASC, stage_id ASC",
        )?;
        let rows = stmt.query_map(params![job_id], stage_from_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row??);
        }
        Ok(results)
    }

    /// Permanently remove a job: stage rows first, then the job row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` when the job does not exist.
    pub fn delete_job(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM stage_results WHERE job_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        tx.commit()?;
        Ok(())
    }
}

fn current_status(conn: &Connection, id: &str) -> Result<JobStatus, StoreError> {
    let status: Option<String> = conn
        .query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()?;
    match status {
        Some(s) => parse_job_status(&s),
        None => Err(StoreError::NotFound { id: id.to_string() }),
    }
}

fn parse_job_status(s: &str) -> Result<JobStatus, StoreError> {
    JobStatus::parse(s).ok_or_else(|| StoreError::Corrupt(format!("unknown job status '{s}'")))
}

fn parse_stage_status(s: &str) -> Result<StageStatus, StoreError> {
    StageStatus::parse(s).ok_or_else(|| StoreError::Corrupt(format!("unknown stage status '{s}'")))
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{s}': {e}")))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Job, StoreError>> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    Ok(build_job(row, &status, &created_at, completed_at.as_deref()))
}

fn build_job(
    row: &Row<'_>,
    status: &str,
    created_at: &str,
    completed_at: Option<&str>,
) -> Result<Job, StoreError> {
    Ok(Job {
        id: row.get("id").map_err(StoreError::Sqlite)?,
        profile_id: row.get("profile_id").map_err(StoreError::Sqlite)?,
        source_path: row.get("source_path").map_err(StoreError::Sqlite)?,
        status: parse_job_status(status)?,
        current_stage: row.get("current_stage").map_err(StoreError::Sqlite)?,
        created_at: parse_ts(created_at)?,
        completed_at: completed_at.map(parse_ts).transpose()?,
        priority: row.get("priority").map_err(StoreError::Sqlite)?,
        cost_estimate: row.get("cost_estimate").map_err(StoreError::Sqlite)?,
        error: row.get("error").map_err(StoreError::Sqlite)?,
    })
}

fn stage_from_row(row: &Row<'_>) -> rusqlite::Result<Result<StageResult, StoreError>> {
    let status: String = row.get("status")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    Ok(build_stage(
        row,
        &status,
        started_at.as_deref(),
        completed_at.as_deref(),
    ))
}

fn build_stage(
    row: &Row<'_>,
    status: &str,
    started_at: Option<&str>,
    completed_at: Option<&str>,
) -> Result<StageResult, StoreError> {
    Ok(StageResult {
        job_id: row.get("job_id").map_err(StoreError::Sqlite)?,
        stage_id: row.get("stage_id").map_err(StoreError::Sqlite)?,
        status: parse_stage_status(status)?,
        started_at: started_at.map(parse_ts).transpose()?,
        completed_at: completed_at.map(parse_ts).transpose()?,
        model_used: row.get("model_used").map_err(StoreError::Sqlite)?,
        input_tokens: row.get("input_tokens").map_err(StoreError::Sqlite)?,
        output_tokens: row.get("output_tokens").map_err(StoreError::Sqlite)?,
        cost_estimate: row.get("cost_estimate").map_err(StoreError::Sqlite)?,
        output_path: row.get("output_path").map_err(StoreError::Sqlite)?,
        error: row.get("error").map_err(StoreError::Sqlite)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> JobStore {
        JobStore::open_in_memory().unwrap()
    }

    fn job(id: &str, priority: i64) -> Job {
        Job::queued(id, "meeting", format!("/tmp/{id}.mp3"), priority)
    }

    #[test]
    fn enqueue_and_claim() {
        let store = store();
        store.enqueue(&job("a", 5)).unwrap();

        let claimed = store.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, "a");
        assert_eq!(claimed.status, JobStatus::Processing);

        // Queue is now empty.
        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn enqueue_duplicate_id_conflicts() {
        let store = store();
        store.enqueue(&job("a", 5)).unwrap();
        let err = store.enqueue(&job("a", 5)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn claim_orders_by_priority_then_age() {
        let store = store();
        let mut low = job("low", 8);
        let mut older = job("older", 3);
        let mut newer = job("newer", 3);
        low.created_at = Utc::now() - Duration::seconds(30);
        older.created_at = Utc::now() - Duration::seconds(20);
        newer.created_at = Utc::now() - Duration::seconds(10);
        store.enqueue(&low).unwrap();
        store.enqueue(&newer).unwrap();
        store.enqueue(&older).unwrap();

        // Lowest numeric priority first; priority ties break by age.
        assert_eq!(store.claim_next().unwrap().unwrap().id, "older");
        assert_eq!(store.claim_next().unwrap().unwrap().id, "newer");
        assert_eq!(store.claim_next().unwrap().unwrap().id, "low");
        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn empty_store_claims_nothing_and_resets_nothing() {
        let store = store();
        assert_eq!(store.reset_orphans().unwrap(), 0);
        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn upsert_stage_transitions_and_stamps() {
        let store = store();
        store.enqueue(&job("a", 5)).unwrap();

        let running = store
            .upsert_stage(
                "a",
                "clean",
                StageStatus::Running,
                StageUpdate {
                    model_used: Some("deepseek-chat".into()),
                    ..StageUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(running.status, StageStatus::Running);
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        let complete = store
            .upsert_stage(
                "a",
                "clean",
                StageStatus::Complete,
                StageUpdate {
                    input_tokens: Some(100),
                    output_tokens: Some(40),
                    cost_estimate: Some(0.001),
                    output_path: Some("/tmp/stage_clean.txt".into()),
                    ..StageUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(complete.status, StageStatus::Complete);
        assert!(complete.completed_at.is_some());
        assert_eq!(complete.input_tokens, 100);
        assert_eq!(complete.model_used.as_deref(), Some("deepseek-chat"));

        let job = store.get_job("a").unwrap().unwrap();
        assert_eq!(job.current_stage.as_deref(), Some("clean"));
    }

    #[test]
    fn job_cost_is_the_sum_of_complete_stage_costs() {
        let store = store();
        store.enqueue(&job("a", 5)).unwrap();

        for (stage, cost) in [("clean", 0.002), ("analyze", 0.003)] {
            store
                .upsert_stage(
                    "a",
                    stage,
                    StageStatus::Complete,
                    StageUpdate {
                        cost_estimate: Some(cost),
                        ..StageUpdate::default()
                    },
                )
                .unwrap();
        }
        // A FAILED stage must not contribute.
        store
            .upsert_stage(
                "a",
                "qa_verify",
                StageStatus::Failed,
                StageUpdate {
                    cost_estimate: Some(9.0),
                    error: Some("401".into()),
                    ..StageUpdate::default()
                },
            )
            .unwrap();

        let job = store.get_job("a").unwrap().unwrap();
        assert!((job.cost_estimate - 0.005).abs() < 1e-9);
    }

    #[test]
    fn retried_stage_overwrites_rather_than_accumulates() {
        let store = store();
        store.enqueue(&job("a", 5)).unwrap();
        for cost in [0.004, 0.002] {
            store
                .upsert_stage(
                    "a",
                    "clean",
                    StageStatus::Complete,
                    StageUpdate {
                        cost_estimate: Some(cost),
                        ..StageUpdate::default()
                    },
                )
                .unwrap();
        }
        let job = store.get_job("a").unwrap().unwrap();
        assert!((job.cost_estimate - 0.002).abs() < 1e-9);
    }

    #[test]
    fn finalize_sets_terminal_state_once() {
        let store = store();
        store.enqueue(&job("a", 5)).unwrap();
        store.claim_next().unwrap().unwrap();

        let done = store.finalize_job("a", JobStatus::Complete, None).unwrap();
        assert_eq!(done.status, JobStatus::Complete);
        assert!(done.completed_at.is_some());

        let err = store
            .finalize_job("a", JobStatus::Failed, Some("late"))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyTerminal { .. }));
        // The stored status is untouched.
        assert_eq!(store.job_status("a").unwrap(), JobStatus::Complete);
    }

    #[test]
    fn cancel_only_active_jobs() {
        let store = store();
        store.enqueue(&job("a", 5)).unwrap();
        assert_eq!(store.cancel("a").unwrap(), JobStatus::Queued);
        assert_eq!(store.job_status("a").unwrap(), JobStatus::Cancelled);

        let err = store.cancel("a").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyTerminal { .. }));

        let err = store.cancel("missing").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn reset_orphans_requeues_processing_jobs_keeping_stages() {
        let store = store();
        store.enqueue(&job("a", 5)).unwrap();
        store.claim_next().unwrap().unwrap();
        store
            .upsert_stage(
                "a",
                "transcription",
                StageStatus::Complete,
                StageUpdate {
                    output_path: Some("/tmp/transcription.json".into()),
                    ..StageUpdate::default()
                },
            )
            .unwrap();

        assert_eq!(store.reset_orphans().unwrap(), 1);
        assert_eq!(store.job_status("a").unwrap(), JobStatus::Queued);
        // Stage rows survive so the next claim resumes.
        let stage = store.get_stage("a", "transcription").unwrap().unwrap();
        assert_eq!(stage.status, StageStatus::Complete);

        // Nothing is processing afterwards.
        assert_eq!(store.reset_orphans().unwrap(), 0);
    }

    #[test]
    fn list_jobs_filters_and_paginates() {
        let store = store();
        for i in 0..5 {
            let mut j = job(&format!("j{i}"), 5);
            j.created_at = Utc::now() - Duration::seconds(100 - i);
            if i % 2 == 1 {
                j.profile_id = "lecture".into();
            }
            store.enqueue(&j).unwrap();
        }

        let all = store.list_jobs(&JobFilter::default()).unwrap();
        assert_eq!(all.total, 5);
        // Newest first.
        assert_eq!(all.jobs[0].id, "j4");

        let lectures = store
            .list_jobs(&JobFilter {
                profile_id: Some("lecture".into()),
                ..JobFilter::default()
            })
            .unwrap();
        assert_eq!(lectures.total, 2);

        let page = store
            .list_jobs(&JobFilter {
                limit: 2,
                offset: 2,
                ..JobFilter::default()
            })
            .unwrap();
        assert_eq!(page.jobs.len(), 2);
        assert_eq!(page.total, 5);
    }

    #[test]
    fn delete_job_removes_stage_rows_first() {
        let store = store();
        store.enqueue(&job("a", 5)).unwrap();
        store
            .upsert_stage("a", "clean", StageStatus::Complete, StageUpdate::default())
            .unwrap();

        store.delete_job("a").unwrap();
        assert!(store.get_job("a").unwrap().is_none());
        assert!(store.get_stage("a", "clean").unwrap().is_none());

        let err = store.delete_job("a").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn stage_results_lists_in_execution_order() {
        let store = store();
        store.enqueue(&job("a", 5)).unwrap();
        store
            .upsert_stage("a", "transcription", StageStatus::Running, StageUpdate::default())
            .unwrap();
        store
            .upsert_stage("a", "transcription", StageStatus::Complete, StageUpdate::default())
            .unwrap();
        store
            .upsert_stage("a", "clean", StageStatus::Running, StageUpdate::default())
            .unwrap();

        let rows = store.stage_results("a").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].stage_id, "transcription");
        assert_eq!(rows[1].stage_id, "clean");
    }
}
