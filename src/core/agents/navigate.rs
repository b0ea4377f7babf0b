use serde::Deserialize;

use super::{Agent, AgentRequest, AgentResult, ClientAction, Intent};
use crate::core::gateway::ChatMessage;

/// Below this the model's guess is not acted on and the user gets a plain
/// reply instead of being moved around the UI.
const CONFIDENCE_GATE: f32 = 0.7;

const KNOWN_TARGETS: [&str; 5] = ["inbox", "tasks", "calendar", "digest", "settings"];

#[derive(Deserialize)]
struct NavigationVerdict {
    wants_navigation: bool,
    #[serde(default)]
    target: String,
    #[serde(default)]
    confidence: f32,
}

/// Maps free-text navigation requests onto a known UI surface. The model
/// returns a JSON verdict; anything malformed, unknown, or under-confident
/// degrades to a text reply.
pub struct NavigateAgent;

impl Agent for NavigateAgent {
    fn intent(&self) -> Intent {
        Intent::Navigate
    }

    fn template_id(&self) -> &'static str {
        "tools/navigation"
    }

    /// Navigation is stateless; conversation context only adds noise to a
    /// structured-output prompt.
    fn build_prompt(&self, system_prompt: &str, req: &AgentRequest) -> Vec<ChatMessage> {
        vec![
            ChatMessage::new("system", system_prompt),
            ChatMessage::new("user", req.raw_input.clone()),
        ]
    }

    fn parse_result(&self, raw: &str, _req: &AgentRequest) -> AgentResult {
        let Some(verdict) = parse_verdict(raw) else {
            return AgentResult::text("I wasn't sure where you wanted to go.");
        };
        if !verdict.wants_navigation
            || verdict.confidence < CONFIDENCE_GATE
            || !KNOWN_TARGETS.contains(&verdict.target.as_str())
        {
            return AgentResult {
                text: "I wasn't sure where you wanted to go.".to_string(),
                confidence: Some(verdict.confidence),
                side_effects: Vec::new(),
                actions: Vec::new(),
            };
        }
        AgentResult {
            text: format!("Taking you to {}.", verdict.target),
            confidence: Some(verdict.confidence),
            side_effects: Vec::new(),
            actions: vec![ClientAction::navigate(verdict.target)],
        }
    }
}

/// Tolerates a fenced code block around the JSON, a habit models refuse to
/// drop no matter what the prompt says.
fn parse_verdict(raw: &str) -> Option<NavigationVerdict> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(input: &str) -> AgentRequest {
        AgentRequest {
            intent: Intent::Navigate,
            raw_input: input.to_string(),
            context: Vec::new(),
        }
    }

    #[test]
    fn confident_verdict_yields_navigate_action() {
        let raw = r#"{"wants_navigation": true, "target": "tasks", "confidence": 0.92}"#;
        let result = NavigateAgent.parse_result(raw, &request("show my tasks"));
        assert_eq!(result.actions, vec![ClientAction::navigate("tasks")]);
    }

    #[test]
    fn low_confidence_verdict_degrades_to_text() {
        let raw = r#"{"wants_navigation": true, "target": "tasks", "confidence": 0.4}"#;
        let result = NavigateAgent.parse_result(raw, &request("tasks maybe?"));
        assert!(result.actions.is_empty());
        assert_eq!(result.confidence, Some(0.4));
    }

    #[test]
    fn unknown_target_is_not_acted_on() {
        let raw = r#"{"wants_navigation": true, "target": "mainframe", "confidence": 0.99}"#;
        let result = NavigateAgent.parse_result(raw, &request("open the mainframe"));
        assert!(result.actions.is_empty());
    }

    #[test]
    fn fenced_json_is_accepted() {
        let raw = "```json\n{\"wants_navigation\": true, \"target\": \"inbox\", \"confidence\": 0.8}\n```";
        let result = NavigateAgent.parse_result(raw, &request("open my inbox"));
        assert_eq!(result.actions, vec![ClientAction::navigate("inbox")]);
    }

    #[test]
    fn garbage_output_degrades_to_text() {
        let result = NavigateAgent.parse_result("Sure thing!", &request("go somewhere"));
        assert!(result.actions.is_empty());
        assert!(!result.text.is_empty());
    }
}
