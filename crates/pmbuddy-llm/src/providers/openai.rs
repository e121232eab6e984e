use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pmbuddy_core::config::ModelConfig;
use pmbuddy_core::error::{PmBuddyError, Result};
use pmbuddy_core::traits::LlmClient;
use pmbuddy_core::types::*;

use crate::streaming::{SseEvent, SseStream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible chat completions client.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
pub(crate) struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
pub(crate) struct OaiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OaiMessage {
    fn text(role: &str, text: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(serde_json::Value::String(text)),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiToolCall {
    #[serde(default)]
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<OaiFunction>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: String,
    function: OaiToolDef,
}

#[derive(Serialize)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDeltaContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

#[derive(Deserialize, Debug)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function".to_string(),
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

pub(crate) fn convert_response_format(format: &ResponseFormat) -> serde_json::Value {
    match format {
        ResponseFormat::JsonObject => serde_json::json!({ "type": "json_object" }),
        ResponseFormat::JsonSchema { name, schema } => serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": name,
                "schema": schema,
                "strict": false,
            }
        }),
    }
}

pub(crate) fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    let mut oai_msgs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => oai_msgs.push(OaiMessage::text("system", msg.text())),
            Role::User | Role::Tool => {
                let tool_results: Vec<_> = msg
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => Some((tool_use_id.clone(), content.clone())),
                        _ => None,
                    })
                    .collect();

                if tool_results.is_empty() {
                    oai_msgs.push(OaiMessage::text("user", msg.text()));
                } else {
                    for (id, content) in tool_results {
                        oai_msgs.push(OaiMessage {
                            tool_call_id: Some(id),
                            ..OaiMessage::text("tool", content)
                        });
                    }
                }
            }
            Role::Assistant => {
                let tool_uses = msg.tool_uses();
                let text = msg.text();
                // Messages forwarded between agents keep their author as `name`
                let name = msg.author.as_ref().map(|a| sanitize_name(a));

                if tool_uses.is_empty() {
                    oai_msgs.push(OaiMessage {
                        name,
                        ..OaiMessage::text("assistant", text)
                    });
                } else {
                    let calls: Vec<OaiToolCall> = tool_uses
                        .iter()
                        .enumerate()
                        .map(|(i, (id, name, input))| OaiToolCall {
                            index: i,
                            id: Some(id.to_string()),
                            r#type: Some("function".to_string()),
                            function: Some(OaiFunction {
                                name: Some(name.to_string()),
                                arguments: Some(input.to_string()),
                            }),
                        })
                        .collect();

                    oai_msgs.push(OaiMessage {
                        role: "assistant".to_string(),
                        content: if text.is_empty() {
                            None
                        } else {
                            Some(serde_json::Value::String(text))
                        },
                        name,
                        tool_calls: Some(calls),
                        tool_call_id: None,
                    });
                }
            }
        }
    }

    oai_msgs
}

/// The `name` field only accepts `[A-Za-z0-9_-]`.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub(crate) fn build_request(
    config: &ModelConfig,
    model: Option<String>,
    messages: Vec<ChatMessage>,
    tools: &[ToolDefinition],
    response_format: Option<&ResponseFormat>,
) -> ChatRequest {
    ChatRequest {
        model,
        messages: convert_messages(messages),
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        stream: true,
        stream_options: StreamOptions {
            include_usage: true,
        },
        tools: convert_tools(tools),
        response_format: response_format.map(convert_response_format),
    }
}

pub(crate) fn parse_chunk(event: SseEvent) -> Vec<Result<StreamDelta>> {
    if event.data.trim() == "[DONE]" {
        return vec![];
    }

    let chunk: StreamChunk = match serde_json::from_str(&event.data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse chat completion chunk");
            return vec![];
        }
    };

    let mut deltas = Vec::new();

    // Azure sends content-filter results as chunks with no choices.
    for choice in chunk.choices.into_iter().take(1) {
        let delta = choice.delta.unwrap_or_default();

        if let Some(text) = delta.content {
            if !text.is_empty() {
                deltas.push(Ok(StreamDelta::TextDelta(text)));
            }
        }

        // Some providers send name and arguments in the same chunk
        if let Some(tool_calls) = delta.tool_calls {
            for tc in tool_calls {
                if let Some(func) = tc.function {
                    if let Some(name) = func.name {
                        deltas.push(Ok(StreamDelta::ToolUseStart {
                            index: tc.index,
                            id: tc.id.unwrap_or_default(),
                            name,
                        }));
                    }
                    if let Some(args) = func.arguments {
                        if !args.is_empty() {
                            deltas.push(Ok(StreamDelta::ToolInputDelta {
                                index: tc.index,
                                delta: args,
                            }));
                        }
                    }
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            let stop = match reason.as_str() {
                "tool_calls" | "function_call" => StopReason::ToolUse,
                "length" => StopReason::MaxTokens,
                "content_filter" => StopReason::ContentFilter,
                _ => StopReason::EndTurn,
            };
            deltas.push(Ok(StreamDelta::Stop(stop)));
        }
    }

    if let Some(usage) = chunk.usage {
        deltas.push(Ok(StreamDelta::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }));
    }

    deltas
}

/// Send a prepared request and turn the SSE body into a delta stream.
///
/// Non-success statuses become `ServiceResponse` errors carrying the status
/// code; connection failures carry none.
pub(crate) async fn send_streaming<'a>(
    req: RequestBuilder,
) -> Result<BoxStream<'a, Result<StreamDelta>>> {
    let response = req
        .send()
        .await
        .map_err(|e| PmBuddyError::transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        return Err(PmBuddyError::ServiceResponse {
            status: Some(status.as_u16()),
            message: body,
        });
    }
    debug!(status = status.as_u16(), "Chat completion stream opened");

    let delta_stream = SseStream::new(response.bytes_stream())
        .map(|event| match event {
            Ok(event) => futures::stream::iter(parse_chunk(event)),
            Err(e) => futures::stream::iter(vec![Err(e)]),
        })
        .flatten();

    Ok(Box::pin(delta_stream))
}

impl LlmClient for OpenAiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        response_format: Option<&ResponseFormat>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let body = build_request(
            &config,
            Some(config.model_id.clone()),
            messages,
            tools,
            response_format,
        );

        Box::pin(async move {
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);
            let mut req = self.http.post(base_url).json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            send_streaming(req).await
        })
    }
}
