use super::{Agent, AgentRequest, AgentResult, Intent};

/// Fallback conversational agent; every input that matches nothing more
/// specific ends up here.
pub struct ChatAgent;

impl Agent for ChatAgent {
    fn intent(&self) -> Intent {
        Intent::Chat
    }

    fn template_id(&self) -> &'static str {
        "system/chat"
    }

    fn parse_result(&self, raw: &str, _req: &AgentRequest) -> AgentResult {
        AgentResult::text(raw.trim())
    }
}
