use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, Row, params};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::core::interview::{Interview, InterviewStatus};
use crate::core::jobs::{Job, JobKind, JobStatus, can_transition};

/// The job and interview tables are the only place that state lives; every
/// mutation goes through here and status writes are validated against the
/// job state machine.
#[derive(Clone)]
pub struct Storage {
    db: Arc<Mutex<Connection>>,
}

impl Storage {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Connection::open(path.as_ref())?;
        let storage = Self {
            db: Arc::new(Mutex::new(db)),
        };
        storage.init_schema().await?;
        info!("Storage ready at {}", path.as_ref().display());
        Ok(storage)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        let storage = Self {
            db: Arc::new(Mutex::new(db)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                result TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE TABLE IF NOT EXISTS interviews (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                status TEXT NOT NULL,
                source TEXT NOT NULL,
                proposed_on TEXT NOT NULL,
                answered_at TEXT,
                answer TEXT,
                resolved_on TEXT
            );",
        )?;
        Ok(())
    }

    // ── Jobs ──

    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO jobs (id, kind, payload, status, created_at, attempt_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job.id.to_string(),
                job.kind.as_str(),
                job.payload.to_string(),
                job.status.as_str(),
                job.created_at.to_rfc3339(),
                job.attempt_count,
            ],
        )?;
        Ok(())
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, kind, payload, status, created_at, started_at, completed_at,
                    attempt_count, last_error, result
             FROM jobs WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id.to_string()], row_to_job)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, kind, payload, status, created_at, started_at, completed_at,
                    attempt_count, last_error, result
             FROM jobs WHERE status = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![status.as_str()], row_to_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    /// A `failed` row with attempts left is a retry waiting for its backoff,
    /// so it counts as active alongside `queued` and `running`.
    pub async fn has_active_job(&self, kind: JobKind, max_attempts: u32) -> Result<bool> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM jobs
             WHERE kind = ?1 AND (status IN ('queued', 'running')
                OR (status = 'failed' AND attempt_count < ?2))",
            params![kind.as_str(), max_attempts],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Queued → running. Increments `attempt_count`, the only place it moves.
    pub async fn mark_job_running(&self, id: Uuid) -> Result<Job> {
        let db = self.db.lock().await;
        check_transition(&db, id, JobStatus::Running)?;
        db.execute(
            "UPDATE jobs SET status = 'running', started_at = ?2,
                    attempt_count = attempt_count + 1
             WHERE id = ?1",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )?;
        get_job_locked(&db, id)?.ok_or_else(|| anyhow!("job not found: {}", id))
    }

    pub async fn finish_job(
        &self,
        id: Uuid,
        status: JobStatus,
        last_error: Option<&str>,
        result: Option<&serde_json::Value>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        check_transition(&db, id, status)?;
        db.execute(
            "UPDATE jobs SET status = ?2, completed_at = ?3, last_error = ?4, result = ?5
             WHERE id = ?1",
            params![
                id.to_string(),
                status.as_str(),
                Utc::now().to_rfc3339(),
                last_error,
                result.map(|v| v.to_string()),
            ],
        )?;
        Ok(())
    }

    /// Failed → queued, for bounded retry. Keeps `last_error` for diagnosis.
    pub async fn requeue_job(&self, id: Uuid) -> Result<()> {
        let db = self.db.lock().await;
        check_transition(&db, id, JobStatus::Queued)?;
        db.execute(
            "UPDATE jobs SET status = 'queued', completed_at = NULL WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    // ── Interviews ──

    pub async fn insert_interview(&self, interview: &Interview) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO interviews (id, question, status, source, proposed_on)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                interview.id.to_string(),
                interview.question,
                interview.status.as_str(),
                interview.source,
                interview.proposed_on.to_string(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_interview(&self, id: Uuid) -> Result<Option<Interview>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, question, status, source, proposed_on, answered_at, answer
             FROM interviews WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id.to_string()], row_to_interview)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn pending_interview(&self) -> Result<Option<Interview>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, question, status, source, proposed_on, answered_at, answer
             FROM interviews WHERE status = 'pending' LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], row_to_interview)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// True when any interview left `pending` on the given reference date.
    pub async fn interview_resolved_on(&self, date: NaiveDate) -> Result<bool> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM interviews WHERE resolved_on = ?1",
            params![date.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub async fn resolve_interview(
        &self,
        id: Uuid,
        status: InterviewStatus,
        answer: Option<&str>,
        resolved_on: NaiveDate,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE interviews SET status = ?2, answer = ?3, answered_at = ?4, resolved_on = ?5
             WHERE id = ?1",
            params![
                id.to_string(),
                status.as_str(),
                answer,
                answer.map(|_| Utc::now().to_rfc3339()),
                resolved_on.to_string(),
            ],
        )?;
        Ok(())
    }
}

fn check_transition(db: &Connection, id: Uuid, to: JobStatus) -> Result<()> {
    let status: String = db.query_row(
        "SELECT status FROM jobs WHERE id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    let from = JobStatus::from_status(&status)
        .ok_or_else(|| anyhow!("job {} has corrupt status '{}'", id, status))?;
    if !can_transition(from, to) {
        return Err(anyhow!(
            "illegal job transition {} -> {} for {}",
            from.as_str(),
            to.as_str(),
            id
        ));
    }
    Ok(())
}

fn get_job_locked(db: &Connection, id: Uuid) -> Result<Option<Job>> {
    let mut stmt = db.prepare(
        "SELECT id, kind, payload, status, created_at, started_at, completed_at,
                attempt_count, last_error, result
         FROM jobs WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map(params![id.to_string()], row_to_job)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let payload: String = row.get(2)?;
    let status: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let started_at: Option<String> = row.get(5)?;
    let completed_at: Option<String> = row.get(6)?;
    let attempt_count: u32 = row.get(7)?;
    let last_error: Option<String> = row.get(8)?;
    let result: Option<String> = row.get(9)?;

    Ok(Job {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        kind: JobKind::from_kind(&kind).unwrap_or(JobKind::Scan),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        status: JobStatus::from_status(&status).unwrap_or(JobStatus::Failed),
        created_at: parse_timestamp(&created_at),
        started_at: started_at.as_deref().map(parse_timestamp),
        completed_at: completed_at.as_deref().map(parse_timestamp),
        attempt_count,
        last_error,
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
    })
}

fn row_to_interview(row: &Row<'_>) -> rusqlite::Result<Interview> {
    let id: String = row.get(0)?;
    let question: String = row.get(1)?;
    let status: String = row.get(2)?;
    let source: String = row.get(3)?;
    let proposed_on: String = row.get(4)?;
    let answered_at: Option<String> = row.get(5)?;
    let answer: Option<String> = row.get(6)?;

    Ok(Interview {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        question,
        status: InterviewStatus::from_status(&status).unwrap_or(InterviewStatus::Dismissed),
        source,
        proposed_on: proposed_on.parse().unwrap_or_else(|_| Utc::now().date_naive()),
        answered_at: answered_at.as_deref().map(parse_timestamp),
        answer,
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
