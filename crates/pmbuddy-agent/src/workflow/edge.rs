use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use pmbuddy_core::issue::GitHubIssue;

use super::message::WorkflowMessage;

type Predicate = dyn Fn(&WorkflowMessage) -> bool + Send + Sync;

/// A directed connection between two executors.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Source executor id.
    pub from: String,
    /// Target executor id.
    pub to: String,
    /// Must hold for a message to be delivered along this edge.
    pub condition: EdgeCondition,
}

/// Condition for delivering a message along an edge.
#[derive(Clone, Default)]
pub enum EdgeCondition {
    /// Deliver everything.
    #[default]
    Always,
    /// Deliver when the message carries an issue tagged with this label.
    HasLabel(String),
    /// Arbitrary predicate, named for logs and the workflow description.
    Custom {
        name: String,
        predicate: Arc<Predicate>,
    },
}

impl EdgeCondition {
    pub fn custom(
        name: impl Into<String>,
        predicate: impl Fn(&WorkflowMessage) -> bool + Send + Sync + 'static,
    ) -> Self {
        EdgeCondition::Custom {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn evaluate(&self, message: &WorkflowMessage) -> bool {
        match self {
            EdgeCondition::Always => true,
            EdgeCondition::HasLabel(label) => message_has_label(message, label),
            EdgeCondition::Custom { predicate, .. } => predicate(message),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            EdgeCondition::Always => "always".to_string(),
            EdgeCondition::HasLabel(label) => format!("has_label({})", label),
            EdgeCondition::Custom { name, .. } => name.clone(),
        }
    }
}

impl fmt::Debug for EdgeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl Edge {
    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: EdgeCondition::Always,
        }
    }

    pub fn conditional(
        from: impl Into<String>,
        to: impl Into<String>,
        condition: EdgeCondition,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition,
        }
    }
}

/// Serializable view of an edge.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeDescription {
    pub from: String,
    pub to: String,
    pub condition: String,
}

impl From<&Edge> for EdgeDescription {
    fn from(edge: &Edge) -> Self {
        Self {
            from: edge.from.clone(),
            to: edge.to.clone(),
            condition: edge.condition.describe(),
        }
    }
}

/// Label-branch predicate.
///
/// Anything other than an agent response passes. An agent response passes
/// only if its text parses as a [`GitHubIssue`] carrying `label`; a payload
/// that does not parse never passes.
pub fn message_has_label(message: &WorkflowMessage, label: &str) -> bool {
    let Some(response) = message.as_agent_response() else {
        return true;
    };

    match GitHubIssue::from_json(&response.agent_run_response.text) {
        Ok(issue) => issue.has_label(label),
        Err(e) => {
            debug!(
                executor = %response.executor_id,
                label,
                error = %e,
                "Response is not a GitHub issue, route not taken"
            );
            false
        }
    }
}

/// Condition that routes issues tagged `label`.
pub fn has_label_condition(label: impl Into<String>) -> EdgeCondition {
    EdgeCondition::HasLabel(label.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::AgentRunResponse;
    use crate::executor::AgentExecutorResponse;
    use pmbuddy_test_utils::issue_json;

    fn agent_response(text: impl Into<String>) -> WorkflowMessage {
        AgentExecutorResponse {
            executor_id: "format-agent".into(),
            agent_run_response: AgentRunResponse {
                agent_id: "format-agent".into(),
                messages: vec![],
                text: text.into(),
                usage: Default::default(),
                turns: 1,
            },
            full_conversation: vec![],
        }
        .into()
    }

    #[test]
    fn test_non_structured_message_passes() {
        let msg = WorkflowMessage::from("not json at all");
        assert!(message_has_label(&msg, "bug"));
        assert!(message_has_label(&msg, "enhancement"));
    }

    #[test]
    fn test_label_membership() {
        let msg = agent_response(issue_json("santiagxf/travel-app", 8, &["bug", "ui"]));
        assert!(message_has_label(&msg, "bug"));
        assert!(message_has_label(&msg, "ui"));
        assert!(!message_has_label(&msg, "enhancement"));
    }

    #[test]
    fn test_label_match_is_case_sensitive() {
        let msg = agent_response(issue_json("santiagxf/travel-app", 8, &["Bug"]));
        assert!(!message_has_label(&msg, "bug"));
    }

    #[test]
    fn test_duplicate_labels_are_irrelevant() {
        let msg = agent_response(issue_json("santiagxf/travel-app", 8, &["bug", "bug"]));
        assert!(message_has_label(&msg, "bug"));
    }

    #[test]
    fn test_empty_labels_never_match() {
        let msg = agent_response(issue_json("santiagxf/travel-app", 8, &[]));
        assert!(!message_has_label(&msg, "bug"));
    }

    #[test]
    fn test_unparseable_payload_fails_closed() {
        for text in ["", "I could not find the issue.", r#"{"labels": ["bug"]}"#] {
            let msg = agent_response(text);
            assert!(!message_has_label(&msg, "bug"), "payload {:?}", text);
            assert!(!message_has_label(&msg, "enhancement"));
        }
    }

    #[test]
    fn test_condition_evaluate_and_describe() {
        let bug = agent_response(issue_json("o/r", 1, &["bug"]));

        assert!(EdgeCondition::Always.evaluate(&bug));
        assert!(has_label_condition("bug").evaluate(&bug));
        assert!(!has_label_condition("enhancement").evaluate(&bug));

        let custom = EdgeCondition::custom("is_text", |m| matches!(m, WorkflowMessage::Text(_)));
        assert!(!custom.evaluate(&bug));
        assert!(custom.evaluate(&WorkflowMessage::from("x")));

        assert_eq!(EdgeCondition::Always.describe(), "always");
        assert_eq!(has_label_condition("bug").describe(), "has_label(bug)");
        assert_eq!(format!("{:?}", custom), "is_text");
    }

    #[test]
    fn test_edge_description() {
        let edge = Edge::conditional("format-agent", "root-cause-agent", has_label_condition("bug"));
        let desc = EdgeDescription::from(&edge);
        assert_eq!(desc.from, "format-agent");
        assert_eq!(desc.to, "root-cause-agent");
        assert_eq!(desc.condition, "has_label(bug)");
    }
}
