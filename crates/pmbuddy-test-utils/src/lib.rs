//! Mocks and fixtures shared by the PM Buddy test suites.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use pmbuddy_core::config::ModelConfig;
use pmbuddy_core::error::{PmBuddyError, Result};
use pmbuddy_core::traits::{LlmClient, Tool};
use pmbuddy_core::types::*;

/// Shared call counter handed out by mocks.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// What the mock LLM saw on one call.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
    pub response_format: Option<ResponseFormat>,
}

/// Handle to the requests recorded by a [`MockLlmClient`].
#[derive(Debug, Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<RecordedRequest>>>);

impl RequestLog {
    pub fn all(&self) -> Vec<RecordedRequest> {
        self.0.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<RecordedRequest> {
        self.all().pop()
    }
}

enum Scripted {
    Deltas(Vec<StreamDelta>),
    Error(PmBuddyError),
}

/// Scripted LLM client. Each call pops the next queued response; an empty
/// queue yields an `LlmStream` error.
#[derive(Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Scripted>>,
    calls: CallCounter,
    requests: RequestLog,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain text answer ending the turn.
    pub fn with_text_response(self, text: impl Into<String>) -> Self {
        self.with_deltas(vec![
            StreamDelta::TextDelta(text.into()),
            StreamDelta::Stop(StopReason::EndTurn),
            StreamDelta::Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        ])
    }

    /// Queue a single tool call.
    pub fn with_tool_call(
        self,
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        self.with_deltas(vec![
            StreamDelta::ToolUseStart {
                index: 0,
                id: id.into(),
                name: name.into(),
            },
            StreamDelta::ToolInputDelta {
                index: 0,
                delta: input.to_string(),
            },
            StreamDelta::Stop(StopReason::ToolUse),
        ])
    }

    pub fn with_deltas(self, deltas: Vec<StreamDelta>) -> Self {
        self.push(Scripted::Deltas(deltas));
        self
    }

    /// Queue an error returned before any stream is opened.
    pub fn with_error(self, error: PmBuddyError) -> Self {
        self.push(Scripted::Error(error));
        self
    }

    pub fn call_counter(&self) -> CallCounter {
        self.calls.clone()
    }

    pub fn requests(&self) -> RequestLog {
        self.requests.clone()
    }

    fn push(&self, item: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }
}

impl LlmClient for MockLlmClient {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        response_format: Option<&ResponseFormat>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        self.calls.bump();
        if let Ok(mut log) = self.requests.0.lock() {
            log.push(RecordedRequest {
                messages,
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
                response_format: response_format.cloned(),
            });
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());

        Box::pin(async move {
            match next {
                Some(Scripted::Deltas(deltas)) => {
                    let stream = futures::stream::iter(deltas.into_iter().map(Ok));
                    Ok(Box::pin(stream) as BoxStream<'_, Result<StreamDelta>>)
                }
                Some(Scripted::Error(e)) => Err(e),
                None => Err(PmBuddyError::LlmStream("mock script exhausted".into())),
            }
        })
    }
}

/// Tool that echoes a fixed output and records its inputs.
pub struct MockTool {
    name: String,
    output: String,
    calls: CallCounter,
    inputs: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl MockTool {
    pub fn new(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: output.into(),
            calls: CallCounter::default(),
            inputs: Arc::default(),
        }
    }

    pub fn call_counter(&self) -> CallCounter {
        self.calls.clone()
    }

    pub fn inputs(&self) -> Arc<Mutex<Vec<serde_json::Value>>> {
        self.inputs.clone()
    }
}

impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "mock tool"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        self.calls.bump();
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(input);
        }
        let output = self.output.clone();
        Box::pin(async move { Ok(ToolResult::success(output)) })
    }
}

/// Issue JSON as the format agent would emit it.
pub fn issue_json(repository: &str, issue_number: u64, labels: &[&str]) -> String {
    serde_json::json!({
        "repository": repository,
        "issue_number": issue_number,
        "title": "Crash when opening settings",
        "body": "Steps to reproduce: open settings.",
        "labels": labels,
    })
    .to_string()
}

pub const PROMPT_NAMES: [&str; 4] = [
    "format_agent",
    "investigate_agent",
    "refine_agent",
    "root_cause_analysis_agent",
];

/// Temporary prompts directory holding one `<name>.prompt` file per agent.
pub fn prompts_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("create temp prompts dir");
    for name in PROMPT_NAMES {
        std::fs::write(
            dir.path().join(format!("{name}.prompt")),
            format!("You are the {name}."),
        )
        .expect("write prompt fixture");
    }
    dir
}
