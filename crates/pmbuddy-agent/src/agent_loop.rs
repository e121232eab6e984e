use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pmbuddy_core::config::{AgentConfig, ModelConfig};
use pmbuddy_core::error::{PmBuddyError, Result};
use pmbuddy_core::event::EventBus;
use pmbuddy_core::traits::LlmClient;
use pmbuddy_core::types::*;
use pmbuddy_tools::ToolRegistry;

/// Accumulator for streaming tool call deltas.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    input_json: String,
}

impl ToolCallAccumulator {
    fn input(&self) -> serde_json::Value {
        if self.input_json.trim().is_empty() {
            return serde_json::json!({});
        }
        serde_json::from_str(&self.input_json).unwrap_or(serde_json::Value::Null)
    }
}

/// Outcome of one agent run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRunResponse {
    pub agent_id: String,
    /// Messages produced during this run (assistant turns and tool results).
    pub messages: Vec<ChatMessage>,
    /// Text of the final assistant message.
    pub text: String,
    pub usage: Usage,
    pub turns: usize,
}

/// One configured LLM agent: instructions, tools, and a chat client.
pub struct AgentRuntime {
    id: String,
    instructions: String,
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    tools: Arc<ToolRegistry>,
    response_format: Option<ResponseFormat>,
    config: AgentConfig,
    event_bus: Option<Arc<EventBus>>,
    cancel: CancellationToken,
}

impl AgentRuntime {
    pub fn new(
        id: impl Into<String>,
        instructions: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        model: ModelConfig,
    ) -> Self {
        Self {
            id: id.into(),
            instructions: instructions.into(),
            llm,
            model,
            tools: Arc::new(ToolRegistry::new()),
            response_format: None,
            config: AgentConfig::default(),
            event_bus: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn with_response_format(mut self, format: Option<ResponseFormat>) -> Self {
        self.response_format = format;
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent_config(&self) -> &AgentConfig {
        &self.config
    }

    /// Get a cancellation token for this runtime.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn publish(&self, event: AgentEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    /// Run the tool-calling loop over `conversation`.
    ///
    /// The system prompt is prepended on every call and never stored in the
    /// returned messages.
    pub async fn run(
        &self,
        run_id: &RunId,
        conversation: Vec<ChatMessage>,
    ) -> Result<AgentRunResponse> {
        let result = self.run_inner(run_id, conversation).await;
        if let Err(e) = &result {
            self.publish(AgentEvent::RunError {
                agent_id: self.id.clone(),
                error: e.to_string(),
            });
        }
        result
    }

    async fn run_inner(
        &self,
        run_id: &RunId,
        conversation: Vec<ChatMessage>,
    ) -> Result<AgentRunResponse> {
        let max_turns = self.config.max_turns;

        self.publish(AgentEvent::RunStarted {
            agent_id: self.id.clone(),
            run_id: run_id.clone(),
        });

        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(ChatMessage::system(self.instructions.clone()));
        messages.extend(conversation);
        let history_len = messages.len();

        let tool_defs = self.tools.definitions();
        let tool_ctx = ToolContext {
            run_id: run_id.clone(),
            agent_id: self.id.clone(),
        };
        let mut usage = Usage::default();

        for turn in 0..max_turns {
            if self.cancel.is_cancelled() {
                return Err(PmBuddyError::Cancelled);
            }

            debug!(agent = %self.id, turn, "Starting agent turn");

            let stream_result = tokio::select! {
                result = self.llm.chat_stream(
                    &self.model,
                    messages.clone(),
                    &tool_defs,
                    self.response_format.as_ref(),
                ) => result,
                _ = self.cancel.cancelled() => return Err(PmBuddyError::Cancelled),
            };

            let mut stream = stream_result?;

            let mut text_content = String::new();
            let mut tool_calls: Vec<ToolCallAccumulator> = Vec::new();
            let mut stop_reason = None;

            while let Some(delta) = stream.next().await {
                if self.cancel.is_cancelled() {
                    return Err(PmBuddyError::Cancelled);
                }

                match delta? {
                    StreamDelta::TextDelta(text) => {
                        self.publish(AgentEvent::TextDelta {
                            agent_id: self.id.clone(),
                            text: text.clone(),
                        });
                        text_content.push_str(&text);
                    }
                    StreamDelta::ToolUseStart { index, id, name } => {
                        while tool_calls.len() <= index {
                            tool_calls.push(ToolCallAccumulator::default());
                        }
                        tool_calls[index].id = id;
                        tool_calls[index].name = name;
                    }
                    StreamDelta::ToolInputDelta { index, delta } => {
                        if let Some(tc) = tool_calls.get_mut(index) {
                            tc.input_json.push_str(&delta);
                        }
                    }
                    StreamDelta::Stop(reason) => {
                        stop_reason = Some(reason);
                    }
                    StreamDelta::Usage {
                        input_tokens,
                        output_tokens,
                    } => {
                        usage.input_tokens += input_tokens;
                        usage.output_tokens += output_tokens;
                    }
                }
            }
            drop(stream);

            // Providers may leave holes in the index space
            tool_calls.retain(|tc| !tc.name.is_empty());

            let mut content_blocks = Vec::new();
            if !text_content.is_empty() {
                content_blocks.push(ContentBlock::Text {
                    text: text_content.clone(),
                });
            }
            for tc in &tool_calls {
                content_blocks.push(ContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input: tc.input(),
                });
            }

            messages.push(
                ChatMessage {
                    role: Role::Assistant,
                    content: content_blocks,
                    author: None,
                    timestamp: None,
                }
                .with_author(self.id.clone()),
            );

            if tool_calls.is_empty() {
                match stop_reason {
                    Some(StopReason::MaxTokens) => {
                        warn!(agent = %self.id, "LLM hit max tokens")
                    }
                    Some(StopReason::ContentFilter) => {
                        warn!(agent = %self.id, "Response stopped by content filter")
                    }
                    _ => {}
                }

                info!(
                    agent = %self.id,
                    turns = turn + 1,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Agent run complete"
                );
                self.publish(AgentEvent::RunComplete {
                    agent_id: self.id.clone(),
                    total_turns: turn + 1,
                    usage,
                });

                return Ok(AgentRunResponse {
                    agent_id: self.id.clone(),
                    messages: messages.split_off(history_len),
                    text: text_content,
                    usage,
                    turns: turn + 1,
                });
            }

            let parsed_inputs: Vec<serde_json::Value> =
                tool_calls.iter().map(|tc| tc.input()).collect();

            for (tc, input) in tool_calls.iter().zip(parsed_inputs.iter()) {
                self.publish(AgentEvent::ToolStart {
                    agent_id: self.id.clone(),
                    name: tc.name.clone(),
                    input: input.clone(),
                });
            }

            let tool_results: Vec<(String, String, ToolResult)> =
                if self.config.parallel_tools && tool_calls.len() > 1 {
                    let futs: Vec<_> = tool_calls
                        .iter()
                        .zip(parsed_inputs)
                        .map(|(tc, input)| {
                            let ctx = tool_ctx.clone();
                            async move {
                                let result = self.execute_tool(&tc.name, input, ctx).await;
                                (tc.name.clone(), tc.id.clone(), result)
                            }
                        })
                        .collect();
                    futures::future::join_all(futs).await
                } else {
                    let mut results = Vec::with_capacity(tool_calls.len());
                    for (tc, input) in tool_calls.iter().zip(parsed_inputs) {
                        let result = self.execute_tool(&tc.name, input, tool_ctx.clone()).await;
                        results.push((tc.name.clone(), tc.id.clone(), result));
                    }
                    results
                };

            let mut tool_result_blocks = Vec::with_capacity(tool_results.len());
            for (name, id, tool_result) in tool_results {
                tool_result_blocks.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: tool_result.content.clone(),
                    is_error: tool_result.is_error,
                });
                self.publish(AgentEvent::ToolEnd {
                    agent_id: self.id.clone(),
                    name,
                    result: tool_result,
                });
            }

            messages.push(ChatMessage {
                role: Role::Tool,
                content: tool_result_blocks,
                author: None,
                timestamp: None,
            });
        }

        Err(PmBuddyError::MaxTurnsExceeded(max_turns))
    }

    /// Tool failures are reported back to the model, never raised.
    async fn execute_tool(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> ToolResult {
        match self.tools.execute(name, input, ctx).await {
            Ok(result) => result,
            Err(e) => {
                error!(agent = %self.id, tool = %name, error = %e, "Tool execution failed");
                ToolResult::error(e.to_string())
            }
        }
    }
}
