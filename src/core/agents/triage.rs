use serde_json::json;

use super::{Agent, AgentRequest, AgentResult, ClientAction, Intent};
use crate::core::jobs::{JobKind, JobSpec};

/// Inbox triage: replies with a triage plan and hands the router a scan job
/// so item metadata is fresh when the user follows through.
pub struct TriageAgent;

impl Agent for TriageAgent {
    fn intent(&self) -> Intent {
        Intent::Triage
    }

    fn template_id(&self) -> &'static str {
        "system/triage"
    }

    fn parse_result(&self, raw: &str, _req: &AgentRequest) -> AgentResult {
        AgentResult {
            text: raw.trim().to_string(),
            confidence: None,
            side_effects: vec![JobSpec {
                kind: JobKind::Scan,
                payload: json!({ "reason": "triage" }),
            }],
            actions: vec![ClientAction::navigate("inbox")],
        }
    }
}
