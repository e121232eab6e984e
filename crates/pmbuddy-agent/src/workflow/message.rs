use serde::Serialize;

use pmbuddy_core::types::ChatMessage;

use crate::executor::AgentExecutorResponse;

/// What travels along workflow edges.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkflowMessage {
    /// Plain input text, usually the initial request.
    Text(String),
    /// A conversation handed over as-is.
    Conversation(Vec<ChatMessage>),
    /// The structured result of an upstream agent executor.
    AgentResponse(Box<AgentExecutorResponse>),
}

impl WorkflowMessage {
    /// Text view of the message: the input text, the last message of a
    /// conversation, or the agent's final answer.
    pub fn text(&self) -> String {
        match self {
            WorkflowMessage::Text(text) => text.clone(),
            WorkflowMessage::Conversation(messages) => {
                messages.last().map(ChatMessage::text).unwrap_or_default()
            }
            WorkflowMessage::AgentResponse(response) => response.agent_run_response.text.clone(),
        }
    }

    /// The conversation an agent continues from.
    pub fn into_conversation(self) -> Vec<ChatMessage> {
        match self {
            WorkflowMessage::Text(text) => vec![ChatMessage::user(text)],
            WorkflowMessage::Conversation(messages) => messages,
            WorkflowMessage::AgentResponse(response) => response.full_conversation,
        }
    }

    pub fn as_agent_response(&self) -> Option<&AgentExecutorResponse> {
        match self {
            WorkflowMessage::AgentResponse(response) => Some(&**response),
            _ => None,
        }
    }
}

impl From<String> for WorkflowMessage {
    fn from(text: String) -> Self {
        WorkflowMessage::Text(text)
    }
}

impl From<&str> for WorkflowMessage {
    fn from(text: &str) -> Self {
        WorkflowMessage::Text(text.to_string())
    }
}

impl From<AgentExecutorResponse> for WorkflowMessage {
    fn from(response: AgentExecutorResponse) -> Self {
        WorkflowMessage::AgentResponse(Box::new(response))
    }
}
