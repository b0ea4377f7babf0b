use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::bus::{Envelope, NotificationBus};
use crate::core::gateway::{ChatMessage, GenerateRequest, GenerationGateway};
use crate::core::interview::{InterviewScheduler, ProposeOutcome, RejectReason};
use crate::core::jobs::{Job, JobKind};
use crate::core::prompts::PromptStore;
use crate::interfaces::items::{Item, ItemSource};

const SCAN_LIMIT: usize = 50;
const CONTEXT_LIMIT: usize = 20;

pub type HandlerMap = HashMap<JobKind, Arc<dyn JobHandler>>;

/// Everything a worker hands to one job attempt. The token is advisory; a
/// handler that never checks it still runs to completion.
pub struct JobContext {
    pub job: Job,
    pub cancel: CancellationToken,
}

impl JobContext {
    /// Yield point for long handlers. Erroring while the token is cancelled
    /// is what the queue records as a cooperative cancellation.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(anyhow!("cancelled"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> Result<Value>;
}

/// Shared dependencies for the built-in handler set.
#[derive(Clone)]
pub struct HandlerDeps {
    pub gateway: Arc<GenerationGateway>,
    pub prompts: Arc<PromptStore>,
    pub interviews: Arc<InterviewScheduler>,
    pub items: Arc<dyn ItemSource>,
    pub bus: Arc<NotificationBus>,
}

/// One handler per job kind; the map is total over `JobKind::ALL` so a
/// persisted job can never dead-letter on a missing handler.
pub fn builtin_handlers(deps: HandlerDeps) -> HandlerMap {
    let mut map: HandlerMap = HashMap::new();
    map.insert(JobKind::Scan, Arc::new(ScanHandler { deps: deps.clone() }));
    map.insert(
        JobKind::ContextScan,
        Arc::new(ContextScanHandler { deps: deps.clone() }),
    );
    map.insert(
        JobKind::DigestBuild,
        Arc::new(DigestBuildHandler { deps: deps.clone() }),
    );
    map.insert(
        JobKind::InterviewSeed,
        Arc::new(InterviewSeedHandler { deps: deps.clone() }),
    );
    map.insert(
        JobKind::LinkSuggest,
        Arc::new(LinkSuggestHandler { deps: deps.clone() }),
    );
    map.insert(
        JobKind::TaskExtract,
        Arc::new(TaskExtractHandler { deps: deps.clone() }),
    );
    map.insert(JobKind::HealthProbe, Arc::new(HealthProbeHandler { deps }));
    map
}

/// Refreshes item metadata from the configured source. Cheap and frequent;
/// the recurring schedule runs this every few minutes.
struct ScanHandler {
    deps: HandlerDeps,
}

#[async_trait]
impl JobHandler for ScanHandler {
    async fn run(&self, ctx: JobContext) -> Result<Value> {
        ctx.checkpoint()?;
        let items = self.deps.items.fetch_items(SCAN_LIMIT).await?;
        let mut sources: Vec<&str> = items.iter().map(|i| i.source.as_str()).collect();
        sources.sort_unstable();
        sources.dedup();
        info!("Scan saw {} items across {} sources", items.len(), sources.len());
        Ok(json!({ "items_seen": items.len(), "sources": sources }))
    }
}

/// Distills recent items into working notes for later prompts.
struct ContextScanHandler {
    deps: HandlerDeps,
}

#[async_trait]
impl JobHandler for ContextScanHandler {
    async fn run(&self, ctx: JobContext) -> Result<Value> {
        ctx.checkpoint()?;
        let items = self.deps.items.fetch_items(CONTEXT_LIMIT).await?;
        if items.is_empty() {
            return Ok(json!({ "items": 0, "notes": Value::Null }));
        }
        ctx.checkpoint()?;

        let system = self.deps.prompts.get("system/summarizer")?;
        let notes = self
            .deps
            .gateway
            .generate(GenerateRequest {
                template_id: "system/summarizer".to_string(),
                messages: vec![
                    ChatMessage::new("system", system.as_str()),
                    ChatMessage::new(
                        "user",
                        format!(
                            "Condense these recent items into short working notes:\n\n{}",
                            items_block(&items)
                        ),
                    ),
                ],
            })
            .await?;
        Ok(json!({ "items": items.len(), "notes": notes }))
    }
}

/// Builds the daily digest and announces it on the bus.
struct DigestBuildHandler {
    deps: HandlerDeps,
}

#[async_trait]
impl JobHandler for DigestBuildHandler {
    async fn run(&self, ctx: JobContext) -> Result<Value> {
        ctx.checkpoint()?;
        let items = self.deps.items.fetch_items(SCAN_LIMIT).await?;
        ctx.checkpoint()?;

        let system = self.deps.prompts.get("tools/digest")?;
        let digest = self
            .deps
            .gateway
            .generate(GenerateRequest {
                template_id: "tools/digest".to_string(),
                messages: vec![
                    ChatMessage::new("system", system.as_str()),
                    ChatMessage::new(
                        "user",
                        format!("Build today's digest from:\n\n{}", items_block(&items)),
                    ),
                ],
            })
            .await?;

        self.deps
            .bus
            .publish(Envelope::new("digest:ready", json!({ "digest": digest })))
            .await;
        Ok(json!({ "items": items.len(), "digest": digest }))
    }
}

/// Generates one strategic question and offers it to the interview
/// scheduler. A rejection by the pending or daily-cap rule is a successful
/// outcome, not a failure.
struct InterviewSeedHandler {
    deps: HandlerDeps,
}

#[async_trait]
impl JobHandler for InterviewSeedHandler {
    async fn run(&self, ctx: JobContext) -> Result<Value> {
        ctx.checkpoint()?;
        if self.deps.interviews.pending().await?.is_some() {
            return Ok(json!({ "proposed": false, "reason": "already_pending" }));
        }

        let items = self.deps.items.fetch_items(CONTEXT_LIMIT).await?;
        ctx.checkpoint()?;

        let system = self.deps.prompts.get("tools/interview")?;
        let question = self
            .deps
            .gateway
            .generate(GenerateRequest {
                template_id: "tools/interview".to_string(),
                messages: vec![
                    ChatMessage::new("system", system.as_str()),
                    ChatMessage::new(
                        "user",
                        format!(
                            "Recent activity:\n\n{}\n\nAsk one question.",
                            items_block(&items)
                        ),
                    ),
                ],
            })
            .await?;
        let question = question.trim();
        if question.is_empty() {
            return Err(anyhow!("interview seed produced an empty question"));
        }

        match self.deps.interviews.propose(question, "seed").await? {
            ProposeOutcome::Proposed(interview) => {
                self.deps
                    .bus
                    .publish(Envelope::new(
                        "interview:new",
                        json!({ "id": interview.id, "question": interview.question }),
                    ))
                    .await;
                Ok(json!({ "proposed": true, "id": interview.id }))
            }
            ProposeOutcome::Rejected(reason) => {
                let reason = match reason {
                    RejectReason::AlreadyPending => "already_pending",
                    RejectReason::DailyLimitReached => "daily_limit_reached",
                };
                Ok(json!({ "proposed": false, "reason": reason }))
            }
        }
    }
}

/// Suggests connections between recent items.
struct LinkSuggestHandler {
    deps: HandlerDeps,
}

#[async_trait]
impl JobHandler for LinkSuggestHandler {
    async fn run(&self, ctx: JobContext) -> Result<Value> {
        ctx.checkpoint()?;
        let items = self.deps.items.fetch_items(CONTEXT_LIMIT).await?;
        if items.len() < 2 {
            return Ok(json!({ "links": [], "items": items.len() }));
        }
        ctx.checkpoint()?;

        let system = self.deps.prompts.get("tools/links")?;
        let raw = self
            .deps
            .gateway
            .generate(GenerateRequest {
                template_id: "tools/links".to_string(),
                messages: vec![
                    ChatMessage::new("system", system.as_str()),
                    ChatMessage::new("user", items_block(&items)),
                ],
            })
            .await?;
        let links = parse_json_block(&raw).unwrap_or_else(|| json!([]));
        Ok(json!({ "links": links, "items": items.len() }))
    }
}

/// Pulls actionable tasks out of recent items.
struct TaskExtractHandler {
    deps: HandlerDeps,
}

#[async_trait]
impl JobHandler for TaskExtractHandler {
    async fn run(&self, ctx: JobContext) -> Result<Value> {
        ctx.checkpoint()?;
        let items = self.deps.items.fetch_items(CONTEXT_LIMIT).await?;
        if items.is_empty() {
            return Ok(json!({ "tasks": [], "items": 0 }));
        }
        ctx.checkpoint()?;

        let system = self.deps.prompts.get("tools/tasks")?;
        let raw = self
            .deps
            .gateway
            .generate(GenerateRequest {
                template_id: "tools/tasks".to_string(),
                messages: vec![
                    ChatMessage::new("system", system.as_str()),
                    ChatMessage::new("user", items_block(&items)),
                ],
            })
            .await?;
        let tasks = parse_json_block(&raw).unwrap_or_else(|| json!([]));
        Ok(json!({ "tasks": tasks, "items": items.len() }))
    }
}

/// Forces one gateway probe, on demand rather than on the idle timer.
struct HealthProbeHandler {
    deps: HandlerDeps,
}

#[async_trait]
impl JobHandler for HealthProbeHandler {
    async fn run(&self, ctx: JobContext) -> Result<Value> {
        ctx.checkpoint()?;
        let healthy = self.deps.gateway.probe_now().await;
        Ok(json!({ "healthy": healthy }))
    }
}

fn items_block(items: &[Item]) -> String {
    items
        .iter()
        .map(|i| format!("- [{}] {}: {}", i.source, i.title, i.snippet))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extracts JSON from model output, with or without a code fence.
fn parse_json_block(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}
