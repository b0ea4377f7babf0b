use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::core::agents::{AgentRegistry, AgentRequest, ClientAction, Intent};
use crate::core::gateway::{ChatMessage, GatewayError, GenerateRequest, GenerationGateway};
use crate::core::interview::{InterviewScheduler, InterviewStatus};
use crate::core::jobs::{JobKind, JobQueue};
use crate::core::prompts::PromptStore;

use crate::core::config::RouterConfig;

/// Inbound user events, already parsed off the wire.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Text { session: Uuid, text: String },
    InterviewAnswer { id: Uuid, answer: String },
    InterviewDismiss { id: Uuid },
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterReply {
    pub text: String,
    pub intent: Intent,
    pub actions: Vec<ClientAction>,
}

impl RouterReply {
    fn plain(intent: Intent, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            intent,
            actions: Vec::new(),
        }
    }
}

/// Front door for user events: classifies, dispatches to exactly one agent,
/// and is the only component that turns agent side effects into queued jobs.
/// Replies are always user-presentable; provider errors never leak through.
pub struct Router {
    registry: AgentRegistry,
    gateway: Arc<GenerationGateway>,
    prompts: Arc<PromptStore>,
    queue: Arc<JobQueue>,
    interviews: Arc<InterviewScheduler>,
    config: RouterConfig,
    sessions: Mutex<HashMap<Uuid, VecDeque<ChatMessage>>>,
}

impl Router {
    pub fn new(
        registry: AgentRegistry,
        gateway: Arc<GenerationGateway>,
        prompts: Arc<PromptStore>,
        queue: Arc<JobQueue>,
        interviews: Arc<InterviewScheduler>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            gateway,
            prompts,
            queue,
            interviews,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Handles one event end to end. Infallible by contract: whatever goes
    /// wrong inside, the caller gets one reply it can show the user.
    pub async fn handle(&self, event: InboundEvent) -> RouterReply {
        self.gateway.touch_activity().await;
        match event {
            InboundEvent::Text { session, text } => self.handle_text(session, text).await,
            InboundEvent::InterviewAnswer { id, answer } => {
                match self.handle_interview_answer(id, &answer).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        error!("Interview answer for {} failed: {}", id, e);
                        friendly_failure(Intent::InterviewAnswer, &e)
                    }
                }
            }
            InboundEvent::InterviewDismiss { id } => match self.interviews.dismiss(id).await {
                Ok(_) => RouterReply::plain(Intent::InterviewDismiss, "Dismissed."),
                Err(e) => {
                    error!("Interview dismissal for {} failed: {}", id, e);
                    friendly_failure(Intent::InterviewDismiss, &e)
                }
            },
        }
    }

    async fn handle_text(&self, session: Uuid, text: String) -> RouterReply {
        let intent = classify(&text);
        info!("Routing message to {} agent", intent.as_str());
        let context = self.session_context(session).await;

        let reply = match self.dispatch(intent, &text, context).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Agent dispatch for {} failed: {}", intent.as_str(), e);
                friendly_failure(intent, &e)
            }
        };
        self.record_turn(session, &text, &reply.text).await;
        reply
    }

    async fn dispatch(
        &self,
        intent: Intent,
        text: &str,
        context: Vec<ChatMessage>,
    ) -> anyhow::Result<RouterReply> {
        let agent = self
            .registry
            .get(intent)
            .ok_or_else(|| anyhow::anyhow!("no agent for intent '{}'", intent.as_str()))?;
        let system = self.prompts.get(agent.template_id())?;

        let req = AgentRequest {
            intent,
            raw_input: text.to_string(),
            context,
        };
        let messages = agent.build_prompt(&system, &req);
        let raw = self
            .gateway
            .generate(GenerateRequest {
                template_id: agent.template_id().to_string(),
                messages,
            })
            .await?;
        let result = agent.parse_result(&raw, &req);

        for spec in &result.side_effects {
            self.queue.enqueue(spec.kind, spec.payload.clone()).await?;
        }
        Ok(RouterReply {
            text: result.text,
            intent,
            actions: result.actions,
        })
    }

    async fn handle_interview_answer(&self, id: Uuid, answer: &str) -> anyhow::Result<RouterReply> {
        let was_pending = self
            .interviews
            .pending()
            .await?
            .is_some_and(|pending| pending.id == id);
        let status = self.interviews.answer(id, answer).await?;

        if was_pending && status == InterviewStatus::Answered {
            // A fresh answer is new signal; fold it into the working context.
            self.queue
                .enqueue(
                    JobKind::ContextScan,
                    serde_json::json!({ "trigger": "interview_answer", "interview_id": id }),
                )
                .await?;
            Ok(RouterReply::plain(
                Intent::InterviewAnswer,
                "Noted, thanks. I'll fold that in.",
            ))
        } else {
            Ok(RouterReply::plain(
                Intent::InterviewAnswer,
                "Already handled that one.",
            ))
        }
    }

    async fn session_context(&self, session: Uuid) -> Vec<ChatMessage> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&session)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Per-session scrollback, bounded so long-lived connections cannot grow
    /// prompts without limit.
    async fn record_turn(&self, session: Uuid, user_text: &str, reply_text: &str) {
        let mut sessions = self.sessions.lock().await;
        let turns = sessions.entry(session).or_default();
        turns.push_back(ChatMessage::new("user", user_text));
        turns.push_back(ChatMessage::new("assistant", reply_text));
        while turns.len() > self.config.context_turns {
            turns.pop_front();
        }
    }

    pub async fn drop_session(&self, session: Uuid) {
        self.sessions.lock().await.remove(&session);
    }
}

/// Cheap, deterministic intent classification: slash commands first, then
/// keyword heuristics, with chat as the catch-all.
pub fn classify(text: &str) -> Intent {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix('/') {
        let command = rest.split_whitespace().next().unwrap_or("");
        return match command {
            "triage" => Intent::Triage,
            "summarize" | "summary" => Intent::Summarize,
            "draft" | "write" => Intent::Draft,
            "digest" => Intent::Digest,
            "go" | "open" => Intent::Navigate,
            _ => Intent::Chat,
        };
    }

    let lower = trimmed.to_lowercase();
    let mentions_inbox =
        lower.contains("inbox") || lower.contains("email") || lower.contains("mail");
    if mentions_inbox
        && (lower.contains("triage") || lower.contains("organize") || lower.contains("sort"))
    {
        return Intent::Triage;
    }
    if lower.starts_with("summarize") || lower.starts_with("summarise") || lower.starts_with("tldr")
    {
        return Intent::Summarize;
    }
    if lower.starts_with("draft") || lower.starts_with("write") {
        return Intent::Draft;
    }
    if lower.starts_with("go to")
        || lower.starts_with("open ")
        || lower.starts_with("show me")
        || lower.starts_with("take me")
    {
        return Intent::Navigate;
    }
    if lower.contains("digest") {
        return Intent::Digest;
    }
    Intent::Chat
}

/// Maps an internal failure to the one reply the user sees. Raw provider
/// text stays in the logs.
fn friendly_failure(intent: Intent, e: &anyhow::Error) -> RouterReply {
    let text = match e.downcast_ref::<GatewayError>() {
        Some(GatewayError::RateLimited) => {
            "I'm getting rate limited by the generation service. Give me a moment and try again."
        }
        Some(GatewayError::Unavailable) => {
            "The generation service is unreachable right now. I'll keep checking in the background."
        }
        _ => "Something went wrong handling that. It's been logged.",
    };
    RouterReply::plain(intent, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    use crate::core::bus::NotificationBus;
    use crate::core::config::{GatewayConfig, QueueConfig};
    use crate::core::gateway::{LlmProvider, ProviderError};
    use crate::core::jobs::JobStatus;
    use crate::core::jobs::handlers::HandlerMap;
    use crate::core::store::Storage;

    struct EchoProvider {
        message_counts: StdMutex<Vec<usize>>,
        fail_with: StdMutex<Option<ProviderError>>,
    }

    impl EchoProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                message_counts: StdMutex::new(Vec::new()),
                fail_with: StdMutex::new(None),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn generate(
            &self,
            _model_id: &str,
            messages: &[ChatMessage],
        ) -> Result<String, ProviderError> {
            if let Some(e) = self.fail_with.lock().unwrap().take() {
                return Err(e);
            }
            self.message_counts.lock().unwrap().push(messages.len());
            Ok(format!("echo: {}", messages.last().unwrap().content))
        }

        async fn probe(&self, _model_id: &str) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    struct Fixture {
        router: Router,
        provider: Arc<EchoProvider>,
        queue: Arc<JobQueue>,
        // Keeps the prompts directory alive for the PromptStore's lazy reads.
        _prompts_dir: tempfile::TempDir,
    }

    async fn fixture(context_turns: usize) -> Fixture {
        let provider = EchoProvider::new();
        let gateway = GenerationGateway::new(
            provider.clone(),
            "m".to_string(),
            GatewayConfig {
                pacing_ms: 1,
                ..GatewayConfig::default()
            },
        );
        let prompts_dir = tempfile::tempdir().unwrap();
        crate::core::prompts::seed_default_templates(prompts_dir.path()).unwrap();
        let prompts = Arc::new(PromptStore::open(prompts_dir.path()).unwrap());
        let store = Storage::open_in_memory().await.unwrap();
        let interviews = Arc::new(InterviewScheduler::new(store.clone()));
        // No workers started: queued jobs stay queued for inspection.
        let queue = JobQueue::new(
            store,
            NotificationBus::new(),
            HandlerMap::new(),
            QueueConfig::default(),
        );
        let router = Router::new(
            AgentRegistry::bootstrap(),
            gateway,
            prompts,
            queue.clone(),
            interviews,
            RouterConfig { context_turns },
        );
        Fixture {
            router,
            provider,
            queue,
            _prompts_dir: prompts_dir,
        }
    }

    #[test]
    fn slash_commands_classify_directly() {
        assert_eq!(classify("/triage"), Intent::Triage);
        assert_eq!(classify("/summary of today"), Intent::Summarize);
        assert_eq!(classify("/draft a reply to Sam"), Intent::Draft);
        assert_eq!(classify("/digest"), Intent::Digest);
        assert_eq!(classify("/open calendar"), Intent::Navigate);
        assert_eq!(classify("/frobnicate"), Intent::Chat);
    }

    #[test]
    fn keyword_classification_falls_back_to_chat() {
        assert_eq!(classify("please triage my inbox"), Intent::Triage);
        assert_eq!(classify("summarize this thread"), Intent::Summarize);
        assert_eq!(classify("write an email to the landlord"), Intent::Draft);
        assert_eq!(classify("take me to my tasks"), Intent::Navigate);
        assert_eq!(classify("what's the weather like"), Intent::Chat);
    }

    #[tokio::test]
    async fn chat_reply_carries_session_context_bounded_by_config() {
        let f = fixture(2).await;
        let session = Uuid::new_v4();

        for i in 0..3 {
            let reply = f
                .router
                .handle(InboundEvent::Text {
                    session,
                    text: format!("message {}", i),
                })
                .await;
            assert_eq!(reply.intent, Intent::Chat);
            assert!(reply.text.starts_with("echo:"));
        }

        // system + bounded context + current input; the buffer holds at most
        // two turns, so the third call cannot grow past four messages.
        let counts = f.provider.message_counts.lock().unwrap().clone();
        assert_eq!(counts, vec![2, 4, 4]);
    }

    #[tokio::test]
    async fn triage_enqueues_scan_and_suggests_navigation() {
        let f = fixture(20).await;
        let reply = f
            .router
            .handle(InboundEvent::Text {
                session: Uuid::new_v4(),
                text: "/triage".to_string(),
            })
            .await;

        assert_eq!(reply.intent, Intent::Triage);
        assert_eq!(reply.actions, vec![ClientAction::navigate("inbox")]);

        let queued = f
            .queue
            .store()
            .jobs_with_status(JobStatus::Queued)
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].kind, JobKind::Scan);
    }

    #[tokio::test]
    async fn provider_failure_becomes_one_friendly_reply() {
        let f = fixture(20).await;
        *f.provider.fail_with.lock().unwrap() =
            Some(ProviderError::Unavailable("socket reset by upstream".to_string()));

        let reply = f
            .router
            .handle(InboundEvent::Text {
                session: Uuid::new_v4(),
                text: "hello".to_string(),
            })
            .await;

        assert_eq!(reply.intent, Intent::Chat);
        assert!(!reply.text.contains("socket reset"));
        assert!(reply.text.contains("unreachable"));
    }

    #[tokio::test]
    async fn fresh_interview_answer_triggers_context_refresh() {
        let f = fixture(20).await;
        let interviews = InterviewScheduler::new(f.queue.store().clone());
        let crate::core::interview::ProposeOutcome::Proposed(interview) =
            interviews.propose("What's the priority?", "seed").await.unwrap()
        else {
            panic!("expected proposal");
        };

        let reply = f
            .router
            .handle(InboundEvent::InterviewAnswer {
                id: interview.id,
                answer: "Ship it".to_string(),
            })
            .await;
        assert!(reply.text.contains("Noted"));

        let queued = f
            .queue
            .store()
            .jobs_with_status(JobStatus::Queued)
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].kind, JobKind::ContextScan);

        // Answering again changes nothing.
        let reply = f
            .router
            .handle(InboundEvent::InterviewAnswer {
                id: interview.id,
                answer: "Again".to_string(),
            })
            .await;
        assert!(reply.text.contains("Already handled"));
    }
}
