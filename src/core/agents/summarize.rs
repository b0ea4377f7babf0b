use super::{Agent, AgentRequest, AgentResult, Intent};

pub struct SummarizeAgent;

impl Agent for SummarizeAgent {
    fn intent(&self) -> Intent {
        Intent::Summarize
    }

    fn template_id(&self) -> &'static str {
        "system/summarizer"
    }

    fn parse_result(&self, raw: &str, _req: &AgentRequest) -> AgentResult {
        AgentResult::text(raw.trim())
    }
}
