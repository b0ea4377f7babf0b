use serde_json::json;

use super::{Agent, AgentRequest, AgentResult, Intent};
use crate::core::jobs::{JobKind, JobSpec};

/// On-demand digest: answers with a quick read of the day and enqueues the
/// full digest build in the background.
pub struct DigestAgent;

impl Agent for DigestAgent {
    fn intent(&self) -> Intent {
        Intent::Digest
    }

    fn template_id(&self) -> &'static str {
        "tools/digest"
    }

    fn parse_result(&self, raw: &str, _req: &AgentRequest) -> AgentResult {
        AgentResult {
            text: raw.trim().to_string(),
            confidence: None,
            side_effects: vec![JobSpec {
                kind: JobKind::DigestBuild,
                payload: json!({ "reason": "requested" }),
            }],
            actions: Vec::new(),
        }
    }
}
