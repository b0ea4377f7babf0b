use anyhow::anyhow;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use uuid::Uuid;

use crate::core::bus::NotificationBus;
use crate::core::config::QueueConfig;
use crate::core::jobs::handlers::{HandlerMap, JobContext, JobHandler};
use crate::core::jobs::{CancelOutcome, Job, JobKind, JobQueue, JobStatus, recurring};
use crate::core::store::Storage;

enum Behavior {
    Succeed,
    Fail,
    /// Logs, then holds the worker until the gate is released.
    BlockUntil(Arc<Notify>),
    /// Holds until the job's cancel token fires, then reports cancellation.
    WaitForCancel,
}

struct TestHandler {
    behavior: Behavior,
    log: Arc<StdMutex<Vec<JobKind>>>,
}

#[async_trait::async_trait]
impl JobHandler for TestHandler {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<Value> {
        self.log.lock().unwrap().push(ctx.job.kind);
        match &self.behavior {
            Behavior::Succeed => Ok(json!({ "ok": true })),
            Behavior::Fail => Err(anyhow!("boom")),
            Behavior::BlockUntil(gate) => {
                gate.notified().await;
                Ok(json!({ "ok": true }))
            }
            Behavior::WaitForCancel => {
                ctx.cancel.cancelled().await;
                ctx.checkpoint()?;
                unreachable!("checkpoint fails once the token is cancelled")
            }
        }
    }
}

struct Fixture {
    queue: Arc<JobQueue>,
    bus: Arc<NotificationBus>,
    log: Arc<StdMutex<Vec<JobKind>>>,
}

async fn fixture(workers: usize, behaviors: Vec<(JobKind, Behavior)>) -> Fixture {
    let store = Storage::open_in_memory().await.unwrap();
    fixture_with_store(store, workers, behaviors).await
}

async fn fixture_with_store(
    store: Storage,
    workers: usize,
    behaviors: Vec<(JobKind, Behavior)>,
) -> Fixture {
    let bus = NotificationBus::new();
    let log = Arc::new(StdMutex::new(Vec::new()));
    let mut handlers: HandlerMap = HandlerMap::new();
    for (kind, behavior) in behaviors {
        handlers.insert(
            kind,
            Arc::new(TestHandler {
                behavior,
                log: log.clone(),
            }),
        );
    }
    let config = QueueConfig {
        workers,
        max_attempts: 3,
        retry_base_ms: 1,
    };
    let queue = JobQueue::new(store, bus.clone(), handlers, config);
    Fixture { queue, bus, log }
}

async fn wait_for(queue: &JobQueue, id: Uuid, status: JobStatus) -> Job {
    for _ in 0..400 {
        let job = queue.status(id).await.unwrap();
        if job.status == status {
            return job;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never reached {:?}", id, status);
}

#[tokio::test]
async fn job_runs_to_success_and_publishes_completion() {
    let f = fixture(1, vec![(JobKind::Scan, Behavior::Succeed)]).await;
    let (_handle, mut rx) = f.bus.subscribe().await;
    f.queue.start().await.unwrap();

    let id = f.queue.enqueue(JobKind::Scan, json!({})).await.unwrap();
    let job = wait_for(&f.queue, id, JobStatus::Succeeded).await;

    assert_eq!(job.attempt_count, 1);
    assert_eq!(job.result, Some(json!({ "ok": true })));
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    let envelope = rx.recv().await.unwrap();
    assert_eq!(envelope.event, "job:completed");
    assert_eq!(envelope.data["id"], json!(id));
}

#[tokio::test]
async fn failing_job_is_retried_to_exhaustion_with_one_notification() {
    let f = fixture(1, vec![(JobKind::Scan, Behavior::Fail)]).await;
    let (_handle, mut rx) = f.bus.subscribe().await;
    f.queue.start().await.unwrap();

    let id = f.queue.enqueue(JobKind::Scan, json!({})).await.unwrap();
    for _ in 0..400 {
        let job = f.queue.status(id).await.unwrap();
        if job.status == JobStatus::Failed && job.attempt_count == 3 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }

    let job = f.queue.status(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt_count, 3);
    assert_eq!(job.last_error.as_deref(), Some("boom"));

    // Intermediate attempts stay quiet; only exhaustion notifies.
    sleep(Duration::from_millis(50)).await;
    let mut failed_events = 0;
    while let Ok(envelope) = rx.try_recv() {
        if envelope.event == "job:failed" {
            failed_events += 1;
        }
    }
    assert_eq!(failed_events, 1);
}

#[tokio::test]
async fn queued_job_cancels_in_place() {
    let f = fixture(1, vec![(JobKind::Scan, Behavior::Succeed)]).await;
    // Workers never started, so the job sits queued.
    let id = f.queue.enqueue(JobKind::Scan, json!({})).await.unwrap();

    assert_eq!(f.queue.cancel(id).await.unwrap(), CancelOutcome::Cancelled);
    let job = f.queue.status(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.attempt_count, 0);

    assert_eq!(
        f.queue.cancel(id).await.unwrap(),
        CancelOutcome::AlreadyTerminal
    );
}

#[tokio::test]
async fn running_job_cancels_cooperatively() {
    let f = fixture(1, vec![(JobKind::Scan, Behavior::WaitForCancel)]).await;
    f.queue.start().await.unwrap();

    let id = f.queue.enqueue(JobKind::Scan, json!({})).await.unwrap();
    wait_for(&f.queue, id, JobStatus::Running).await;

    assert_eq!(f.queue.cancel(id).await.unwrap(), CancelOutcome::Cancelled);
    let job = wait_for(&f.queue, id, JobStatus::Cancelled).await;
    assert_eq!(job.attempt_count, 1);
}

#[tokio::test]
async fn high_lane_jumps_ahead_of_bulk_backlog() {
    let gate = Arc::new(Notify::new());
    let f = fixture(
        1,
        vec![
            (JobKind::Scan, Behavior::BlockUntil(gate.clone())),
            (JobKind::ContextScan, Behavior::Succeed),
            (JobKind::InterviewSeed, Behavior::Succeed),
        ],
    )
    .await;
    f.queue.start().await.unwrap();

    // Occupy the only worker, then back up one bulk and one high job.
    let blocker = f.queue.enqueue(JobKind::Scan, json!({})).await.unwrap();
    wait_for(&f.queue, blocker, JobStatus::Running).await;
    let bulk = f.queue.enqueue(JobKind::ContextScan, json!({})).await.unwrap();
    let high = f.queue.enqueue(JobKind::InterviewSeed, json!({})).await.unwrap();

    gate.notify_one();
    wait_for(&f.queue, bulk, JobStatus::Succeeded).await;
    wait_for(&f.queue, high, JobStatus::Succeeded).await;

    let order = f.log.lock().unwrap().clone();
    assert_eq!(
        order,
        vec![JobKind::Scan, JobKind::InterviewSeed, JobKind::ContextScan]
    );
}

#[tokio::test]
async fn recurring_tick_skips_while_previous_run_is_active() {
    let gate = Arc::new(Notify::new());
    let f = fixture(1, vec![(JobKind::Scan, Behavior::BlockUntil(gate.clone()))]).await;
    f.queue.start().await.unwrap();

    let first = f.queue.enqueue(JobKind::Scan, json!({})).await.unwrap();
    wait_for(&f.queue, first, JobStatus::Running).await;

    recurring::tick(f.queue.clone(), JobKind::Scan).await;
    assert!(
        f.queue
            .store()
            .jobs_with_status(JobStatus::Queued)
            .await
            .unwrap()
            .is_empty(),
        "tick must not stack a duplicate behind an active run"
    );

    gate.notify_one();
    wait_for(&f.queue, first, JobStatus::Succeeded).await;

    recurring::tick(f.queue.clone(), JobKind::Scan).await;
    gate.notify_one();
    for _ in 0..400 {
        let done = f
            .queue
            .store()
            .jobs_with_status(JobStatus::Succeeded)
            .await
            .unwrap();
        if done.len() == 2 {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("tick after completion should have enqueued a fresh run");
}

#[tokio::test]
async fn recurring_tick_skips_while_a_retry_is_pending() {
    let f = fixture(1, vec![(JobKind::Scan, Behavior::Succeed)]).await;
    // Workers never started; shape the row into failed-with-attempts-left,
    // the state a job sits in during its retry backoff.
    let id = f.queue.enqueue(JobKind::Scan, json!({})).await.unwrap();
    f.queue.store().mark_job_running(id).await.unwrap();
    f.queue
        .store()
        .finish_job(id, JobStatus::Failed, Some("boom"), None)
        .await
        .unwrap();

    recurring::tick(f.queue.clone(), JobKind::Scan).await;
    assert!(
        f.queue
            .store()
            .jobs_with_status(JobStatus::Queued)
            .await
            .unwrap()
            .is_empty(),
        "tick must not stack a duplicate behind a pending retry"
    );
}

#[tokio::test]
async fn startup_requeues_failed_job_with_attempts_left() {
    let store = Storage::open_in_memory().await.unwrap();
    let job = Job::new(JobKind::Scan, json!({}));
    store.insert_job(&job).await.unwrap();
    store.mark_job_running(job.id).await.unwrap();
    store
        .finish_job(job.id, JobStatus::Failed, Some("boom"), None)
        .await
        .unwrap();

    // A crash between the failure write and the delayed requeue must not
    // strand the job in `failed` with attempts to spare.
    let f = fixture_with_store(store, 1, vec![(JobKind::Scan, Behavior::Succeed)]).await;
    f.queue.start().await.unwrap();

    let recovered = wait_for(&f.queue, job.id, JobStatus::Succeeded).await;
    assert_eq!(recovered.attempt_count, 2);
}

#[tokio::test]
async fn startup_recovers_job_interrupted_mid_run() {
    let store = Storage::open_in_memory().await.unwrap();
    let job = Job::new(JobKind::Scan, json!({}));
    store.insert_job(&job).await.unwrap();
    store.mark_job_running(job.id).await.unwrap();

    let f = fixture_with_store(store, 1, vec![(JobKind::Scan, Behavior::Succeed)]).await;
    f.queue.start().await.unwrap();

    let recovered = wait_for(&f.queue, job.id, JobStatus::Succeeded).await;
    assert_eq!(recovered.attempt_count, 2);
}

#[tokio::test]
async fn startup_fails_interrupted_job_with_no_attempts_left() {
    let store = Storage::open_in_memory().await.unwrap();
    let job = Job::new(JobKind::Scan, json!({}));
    store.insert_job(&job).await.unwrap();
    for _ in 0..2 {
        store.mark_job_running(job.id).await.unwrap();
        store
            .finish_job(job.id, JobStatus::Failed, Some("boom"), None)
            .await
            .unwrap();
        store.requeue_job(job.id).await.unwrap();
    }
    store.mark_job_running(job.id).await.unwrap();

    let f = fixture_with_store(store, 1, vec![(JobKind::Scan, Behavior::Succeed)]).await;
    f.queue.start().await.unwrap();

    let job = wait_for(&f.queue, job.id, JobStatus::Failed).await;
    assert_eq!(job.attempt_count, 3);
    assert_eq!(job.last_error.as_deref(), Some("worker lost"));
}
