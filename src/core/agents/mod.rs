mod chat;
mod digest;
mod draft;
mod navigate;
mod summarize;
mod triage;

pub use chat::ChatAgent;
pub use digest::DigestAgent;
pub use draft::DraftAgent;
pub use navigate::NavigateAgent;
pub use summarize::SummarizeAgent;
pub use triage::TriageAgent;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::gateway::ChatMessage;
use crate::core::jobs::JobSpec;

/// Closed set of things the assistant can be asked to do. Classification
/// never fails: ambiguous input lands on `Chat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Chat,
    Triage,
    Summarize,
    Draft,
    Digest,
    Navigate,
    InterviewAnswer,
    InterviewDismiss,
}

impl Intent {
    /// Intents resolved by a generation agent. `InterviewAnswer` and
    /// `InterviewDismiss` mutate interview state directly in the router and
    /// never reach the Gateway.
    pub const GENERATIVE: [Intent; 6] = [
        Intent::Chat,
        Intent::Triage,
        Intent::Summarize,
        Intent::Draft,
        Intent::Digest,
        Intent::Navigate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Chat => "chat",
            Intent::Triage => "triage",
            Intent::Summarize => "summarize",
            Intent::Draft => "draft",
            Intent::Digest => "digest",
            Intent::Navigate => "navigate",
            Intent::InterviewAnswer => "interview_answer",
            Intent::InterviewDismiss => "interview_dismiss",
        }
    }
}

/// Ephemeral request handed to one agent: never persisted.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub intent: Intent,
    pub raw_input: String,
    pub context: Vec<ChatMessage>,
}

/// A UI hint delivered back inside the reply envelope; the server never acts
/// on these itself.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClientAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
}

impl ClientAction {
    pub fn navigate(target: impl Into<String>) -> Self {
        Self {
            kind: "navigate".to_string(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentResult {
    pub text: String,
    pub confidence: Option<f32>,
    pub side_effects: Vec<JobSpec>,
    pub actions: Vec<ClientAction>,
}

impl AgentResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A prompt-template-bound handler: composes the generation request for its
/// intent and turns raw generation output into a structured result. Agents
/// never chain into other agents and never touch the job queue; follow-up
/// work is returned as `side_effects` for the router to enqueue.
pub trait Agent: Send + Sync {
    fn intent(&self) -> Intent;

    /// Template key under the prompts directory, without extension.
    fn template_id(&self) -> &'static str;

    fn build_prompt(&self, system_prompt: &str, req: &AgentRequest) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::new("system", system_prompt)];
        messages.extend(req.context.iter().cloned());
        messages.push(ChatMessage::new("user", req.raw_input.clone()));
        messages
    }

    fn parse_result(&self, raw: &str, req: &AgentRequest) -> AgentResult;
}

/// Compile-time-closed intent dispatch: every generative tag must have a
/// handler before the process enters serving state.
pub struct AgentRegistry {
    agents: HashMap<Intent, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn bootstrap() -> Self {
        let mut registry = Self {
            agents: HashMap::new(),
        };
        registry.register(Arc::new(ChatAgent));
        registry.register(Arc::new(TriageAgent));
        registry.register(Arc::new(SummarizeAgent));
        registry.register(Arc::new(DraftAgent));
        registry.register(Arc::new(DigestAgent));
        registry.register(Arc::new(NavigateAgent));
        registry
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.intent(), agent);
    }

    pub fn get(&self, intent: Intent) -> Option<Arc<dyn Agent>> {
        self.agents.get(&intent).cloned()
    }

    /// Startup gate: an unknown tag is a misconfiguration, rejected here
    /// rather than at dispatch time.
    pub fn verify_complete(&self) -> Result<()> {
        for intent in Intent::GENERATIVE {
            if !self.agents.contains_key(&intent) {
                return Err(anyhow!("no agent registered for intent '{}'", intent.as_str()));
            }
        }
        Ok(())
    }

    pub fn template_ids(&self) -> Vec<&'static str> {
        self.agents.values().map(|a| a.template_id()).collect()
    }
}
