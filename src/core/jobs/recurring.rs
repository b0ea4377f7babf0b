use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tokio_cron_scheduler::JobScheduler;
use tracing::{error, warn};

use crate::core::jobs::{JobKind, JobQueue};

/// Built-in recurring work. Six-field cron, seconds first.
const RECURRING: [(JobKind, &str); 4] = [
    (JobKind::Scan, "0 */15 * * * *"),
    (JobKind::ContextScan, "0 5 * * * *"),
    (JobKind::DigestBuild, "0 0 7 * * *"),
    (JobKind::InterviewSeed, "0 30 7 * * *"),
];

pub async fn register_recurring(scheduler: &JobScheduler, queue: Arc<JobQueue>) -> Result<()> {
    for (kind, cron_expr) in RECURRING {
        let queue_for_job = queue.clone();
        let cron_job = tokio_cron_scheduler::Job::new_async(cron_expr, move |_uuid, mut _l| {
            let queue = queue_for_job.clone();
            Box::pin(async move {
                tick(queue, kind).await;
            })
        })?;
        scheduler.add(cron_job).await?;
    }
    Ok(())
}

/// One recurring fire. A tick never stacks duplicates: if the previous run
/// of this kind is still queued or running, the tick is skipped whole, not
/// deferred.
pub(crate) async fn tick(queue: Arc<JobQueue>, kind: JobKind) {
    match queue.has_active(kind).await {
        Ok(true) => {
            warn!(
                "Skipping recurring {} tick: previous run still active",
                kind.as_str()
            );
        }
        Ok(false) => {
            if let Err(e) = queue.enqueue(kind, json!({ "trigger": "recurring" })).await {
                error!("Failed to enqueue recurring {}: {}", kind.as_str(), e);
            }
        }
        Err(e) => {
            error!("Recurring {} tick could not check status: {}", kind.as_str(), e);
        }
    }
}
