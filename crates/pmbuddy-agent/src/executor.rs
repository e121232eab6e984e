use futures::future::BoxFuture;
use serde::Serialize;
use tracing::info;

use pmbuddy_core::error::{PmBuddyError, Result};
use pmbuddy_core::retry::RetryPolicy;
use pmbuddy_core::types::{ChatMessage, RunId};

use crate::agent_loop::{AgentRunResponse, AgentRuntime};
use crate::workflow::{Executor, WorkflowMessage};

/// What an agent executor sends downstream.
#[derive(Debug, Clone, Serialize)]
pub struct AgentExecutorResponse {
    pub executor_id: String,
    pub agent_run_response: AgentRunResponse,
    /// The conversation the agent received plus everything it produced.
    pub full_conversation: Vec<ChatMessage>,
}

/// Runs an agent as a workflow step, retrying transient service failures.
pub struct AgentExecutor {
    runtime: AgentRuntime,
    policy: RetryPolicy,
}

impl AgentExecutor {
    pub fn new(runtime: AgentRuntime) -> Self {
        let policy = RetryPolicy::from_config(&runtime.agent_config().retry);
        Self { runtime, policy }
    }
}

impl Executor for AgentExecutor {
    fn id(&self) -> &str {
        self.runtime.id()
    }

    fn handle(
        &self,
        message: WorkflowMessage,
        run_id: RunId,
    ) -> BoxFuture<'_, Result<Vec<WorkflowMessage>>> {
        Box::pin(async move {
            let conversation = message.into_conversation();
            info!(
                executor = %self.id(),
                messages = conversation.len(),
                "Running agent executor"
            );

            let response = self
                .policy
                .run("agent run", PmBuddyError::is_transient, || {
                    self.runtime.run(&run_id, conversation.clone())
                })
                .await?;

            let mut full_conversation = conversation;
            full_conversation.extend(response.messages.iter().cloned());

            Ok(vec![WorkflowMessage::AgentResponse(Box::new(
                AgentExecutorResponse {
                    executor_id: self.id().to_string(),
                    agent_run_response: response,
                    full_conversation,
                },
            ))])
        })
    }
}
