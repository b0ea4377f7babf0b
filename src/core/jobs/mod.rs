pub mod handlers;
pub mod recurring;

#[cfg(test)]
mod tests;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::bus::{Envelope, NotificationBus};
use crate::core::config::QueueConfig;
use crate::core::store::Storage;
use handlers::{HandlerMap, JobContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Cancelled)
    }
}

/// Status transitions are monotonic: `failed` re-queues only while attempts
/// remain, which the queue checks before asking the store for the edge.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    match from {
        JobStatus::Queued => matches!(
            to,
            JobStatus::Running | JobStatus::Cancelled | JobStatus::Failed
        ),
        JobStatus::Running => matches!(
            to,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        ),
        JobStatus::Failed => matches!(to, JobStatus::Queued),
        JobStatus::Succeeded | JobStatus::Cancelled => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Scan,
    ContextScan,
    DigestBuild,
    InterviewSeed,
    LinkSuggest,
    TaskExtract,
    HealthProbe,
}

impl JobKind {
    pub const ALL: [JobKind; 7] = [
        JobKind::Scan,
        JobKind::ContextScan,
        JobKind::DigestBuild,
        JobKind::InterviewSeed,
        JobKind::LinkSuggest,
        JobKind::TaskExtract,
        JobKind::HealthProbe,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Scan => "scan",
            JobKind::ContextScan => "context_scan",
            JobKind::DigestBuild => "digest_build",
            JobKind::InterviewSeed => "interview_seed",
            JobKind::LinkSuggest => "link_suggest",
            JobKind::TaskExtract => "task_extract",
            JobKind::HealthProbe => "health_probe",
        }
    }

    pub fn from_kind(value: &str) -> Option<Self> {
        match value {
            "scan" => Some(JobKind::Scan),
            "context_scan" => Some(JobKind::ContextScan),
            "digest_build" => Some(JobKind::DigestBuild),
            "interview_seed" => Some(JobKind::InterviewSeed),
            "link_suggest" => Some(JobKind::LinkSuggest),
            "task_extract" => Some(JobKind::TaskExtract),
            "health_probe" => Some(JobKind::HealthProbe),
            _ => None,
        }
    }

    /// Interview seeds and health probes jump the line ahead of bulk work.
    pub fn priority(self) -> JobPriority {
        match self {
            JobKind::InterviewSeed | JobKind::HealthProbe => JobPriority::High,
            _ => JobPriority::Bulk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPriority {
    High,
    Bulk,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl Job {
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempt_count: 0,
            last_error: None,
            result: None,
        }
    }
}

/// A follow-up job an agent wants enqueued. Agents return these instead of
/// touching the queue so the router stays the single queue mutator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub kind: JobKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl JobSpec {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(kind: JobKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyTerminal,
}

#[derive(Default)]
struct Lanes {
    high: VecDeque<Uuid>,
    bulk: VecDeque<Uuid>,
}

impl Lanes {
    fn push(&mut self, id: Uuid, priority: JobPriority) {
        match priority {
            JobPriority::High => self.high.push_back(id),
            JobPriority::Bulk => self.bulk.push_back(id),
        }
    }

    fn pop(&mut self) -> Option<Uuid> {
        self.high.pop_front().or_else(|| self.bulk.pop_front())
    }
}

/// Background work queue: FIFO within a lane, priority lane first, fixed
/// worker pool, bounded retry with exponential backoff, advisory cancel.
pub struct JobQueue {
    store: Storage,
    bus: Arc<NotificationBus>,
    handlers: HandlerMap,
    config: QueueConfig,
    lanes: Mutex<Lanes>,
    wakeup: Notify,
    cancel_tokens: Mutex<HashMap<Uuid, CancellationToken>>,
    shutdown: CancellationToken,
}

impl JobQueue {
    pub fn new(
        store: Storage,
        bus: Arc<NotificationBus>,
        handlers: HandlerMap,
        config: QueueConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            handlers,
            config,
            lanes: Mutex::new(Lanes::default()),
            wakeup: Notify::new(),
            cancel_tokens: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn store(&self) -> &Storage {
        &self.store
    }

    /// Spawn the worker pool and recover jobs left over from a prior run:
    /// `queued` rows re-enter the lanes, `running` rows from a crash become
    /// `failed`, and `failed` rows with attempts left are re-queued. The
    /// last group covers both crashed runs and retries whose backoff timer
    /// died with the process.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for job in self.store.jobs_with_status(JobStatus::Running).await? {
            self.store
                .finish_job(job.id, JobStatus::Failed, Some("worker lost"), None)
                .await?;
        }
        for job in self.store.jobs_with_status(JobStatus::Failed).await? {
            if job.attempt_count < self.config.max_attempts {
                self.store.requeue_job(job.id).await?;
            }
        }
        let queued = self.store.jobs_with_status(JobStatus::Queued).await?;
        if !queued.is_empty() {
            info!("Recovered {} queued jobs from a prior run", queued.len());
            let mut lanes = self.lanes.lock().await;
            for job in queued {
                lanes.push(job.id, job.kind.priority());
            }
        }

        for worker_id in 0..self.config.workers.max(1) {
            let queue = self.clone();
            tokio::spawn(async move { queue.worker_loop(worker_id).await });
        }
        info!("Job queue started ({} workers)", self.config.workers.max(1));
        Ok(())
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub async fn enqueue(&self, kind: JobKind, payload: serde_json::Value) -> Result<Uuid> {
        let job = Job::new(kind, payload);
        let id = job.id;
        self.store.insert_job(&job).await?;
        self.lanes.lock().await.push(id, kind.priority());
        self.wakeup.notify_one();
        info!("Enqueued job {} ({})", id, kind.as_str());
        Ok(id)
    }

    pub async fn status(&self, id: Uuid) -> Result<Job> {
        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| anyhow!("job not found: {}", id))
    }

    /// Advisory cancellation: a queued job is cancelled in place, a running
    /// job sees its token at the next yield point, a terminal job is left
    /// untouched.
    pub async fn cancel(&self, id: Uuid) -> Result<CancelOutcome> {
        let job = self.status(id).await?;
        match job.status {
            JobStatus::Queued => {
                self.store
                    .finish_job(id, JobStatus::Cancelled, None, None)
                    .await?;
                self.publish_status(&self.status(id).await?).await;
                Ok(CancelOutcome::Cancelled)
            }
            JobStatus::Running => {
                if let Some(token) = self.cancel_tokens.lock().await.get(&id) {
                    token.cancel();
                }
                Ok(CancelOutcome::Cancelled)
            }
            _ => Ok(CancelOutcome::AlreadyTerminal),
        }
    }

    /// True when a job of this kind is queued, running, or failed with a
    /// retry still owed. Recurring ticks use this to skip instead of
    /// stacking duplicates, including during a retry backoff window.
    pub async fn has_active(&self, kind: JobKind) -> Result<bool> {
        self.store
            .has_active_job(kind, self.config.max_attempts)
            .await
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        loop {
            let next = { self.lanes.lock().await.pop() };
            let Some(id) = next else {
                tokio::select! {
                    _ = self.wakeup.notified() => continue,
                    _ = self.shutdown.cancelled() => return,
                }
            };
            if self.shutdown.is_cancelled() {
                return;
            }
            if let Err(e) = self.run_one(worker_id, id).await {
                error!("Worker {} internal error on job {}: {}", worker_id, id, e);
            }
        }
    }

    /// Runs one job attempt. The worker owns the job exclusively from the
    /// `running` write until the terminal or re-queued write.
    async fn run_one(self: &Arc<Self>, worker_id: usize, id: Uuid) -> Result<()> {
        // Lane entries are dropped lazily: a row cancelled while queued is
        // skipped here instead of at cancel time.
        let Some(job) = self.store.get_job(id).await? else {
            warn!("Job {} vanished before execution", id);
            return Ok(());
        };
        if job.status != JobStatus::Queued {
            return Ok(());
        }

        let job = self.store.mark_job_running(id).await?;
        let handler = match self.handlers.get(&job.kind) {
            Some(handler) => handler.clone(),
            None => {
                self.store
                    .finish_job(id, JobStatus::Failed, Some("no handler for job kind"), None)
                    .await?;
                self.publish_status(&self.status(id).await?).await;
                return Ok(());
            }
        };

        let token = CancellationToken::new();
        self.cancel_tokens.lock().await.insert(id, token.clone());
        info!(
            "Worker {} running job {} ({}) attempt {}",
            worker_id,
            id,
            job.kind.as_str(),
            job.attempt_count
        );

        let ctx = JobContext {
            job: job.clone(),
            cancel: token.clone(),
        };
        let outcome = handler.run(ctx).await;
        self.cancel_tokens.lock().await.remove(&id);

        match outcome {
            Ok(result) => {
                self.store
                    .finish_job(id, JobStatus::Succeeded, None, Some(&result))
                    .await?;
                self.publish_status(&self.status(id).await?).await;
            }
            Err(_) if token.is_cancelled() => {
                self.store
                    .finish_job(id, JobStatus::Cancelled, Some("cancelled"), None)
                    .await?;
                info!("Job {} cancelled cooperatively", id);
                self.publish_status(&self.status(id).await?).await;
            }
            Err(e) => {
                self.store
                    .finish_job(id, JobStatus::Failed, Some(&e.to_string()), None)
                    .await?;
                let job = self.status(id).await?;
                if job.attempt_count < self.config.max_attempts {
                    let backoff = self.retry_backoff(job.attempt_count);
                    warn!(
                        "Job {} failed (attempt {}), retrying in {:?}: {}",
                        id, job.attempt_count, backoff, e
                    );
                    let queue = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(backoff).await;
                        if let Err(e) = queue.requeue(id).await {
                            error!("Failed to requeue job {}: {}", id, e);
                        }
                    });
                } else {
                    // Exhausted: exactly one failure notification, never one
                    // per attempt.
                    warn!(
                        "Job {} failed permanently after {} attempts: {}",
                        id, job.attempt_count, e
                    );
                    self.publish_status(&job).await;
                }
            }
        }
        Ok(())
    }

    async fn requeue(&self, id: Uuid) -> Result<()> {
        self.store.requeue_job(id).await?;
        let job = self.status(id).await?;
        self.lanes.lock().await.push(id, job.kind.priority());
        self.wakeup.notify_one();
        Ok(())
    }

    fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.config.retry_base_ms)
            .saturating_mul(1u32 << attempt.min(6))
            .min(Duration::from_secs(30))
    }

    async fn publish_status(&self, job: &Job) {
        let event = match job.status {
            JobStatus::Succeeded => "job:completed",
            JobStatus::Failed => "job:failed",
            JobStatus::Cancelled => "job:cancelled",
            _ => "job:update",
        };
        self.bus
            .publish(Envelope::new(
                event,
                serde_json::json!({
                    "id": job.id,
                    "kind": job.kind.as_str(),
                    "status": job.status.as_str(),
                    "attempt_count": job.attempt_count,
                    "error": job.last_error,
                }),
            ))
            .await;
    }
}
