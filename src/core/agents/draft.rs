use super::{Agent, AgentRequest, AgentResult, Intent};

/// Drafting agent for outgoing messages. The draft comes back as reply text;
/// nothing is sent on the user's behalf.
pub struct DraftAgent;

impl Agent for DraftAgent {
    fn intent(&self) -> Intent {
        Intent::Draft
    }

    fn template_id(&self) -> &'static str {
        "system/writer"
    }

    fn parse_result(&self, raw: &str, _req: &AgentRequest) -> AgentResult {
        AgentResult::text(raw.trim())
    }
}
