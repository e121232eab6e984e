use std::sync::Arc;

use pmbuddy_agent::{
    build_triage_workflow, AgentExecutor, AgentKind, AgentRuntime, TriageAgents, WorkflowEvent,
    WorkflowRunResult, WorkflowRunState,
};
use pmbuddy_core::config::ModelConfig;
use pmbuddy_core::types::{ContentBlock, ResponseFormat, StopReason, StreamDelta};
use pmbuddy_test_utils::{issue_json, CallCounter, MockLlmClient, RequestLog};
use pmbuddy_tools::ToolRegistry;

const INPUT: &str = "You are assigned issue number 8 in the repository `santiagxf/travel-app`";

struct Harness {
    calls: Vec<(AgentKind, CallCounter)>,
    requests: Vec<(AgentKind, RequestLog)>,
}

impl Harness {
    fn calls(&self, kind: AgentKind) -> usize {
        self.calls
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, c)| c.get())
            .unwrap()
    }

    fn requests(&self, kind: AgentKind) -> RequestLog {
        self.requests
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, r)| r.clone())
            .unwrap()
    }
}

fn executor(kind: AgentKind, llm: MockLlmClient, harness: &mut Harness) -> AgentExecutor {
    harness.calls.push((kind, llm.call_counter()));
    harness.requests.push((kind, llm.requests()));
    AgentExecutor::new(
        AgentRuntime::new(
            kind.id(),
            format!("You are the {}.", kind.prompt_name()),
            Arc::new(llm),
            ModelConfig::default(),
        )
        .with_response_format(kind.response_format()),
    )
}

/// Run the triage graph with the format agent producing `format_output`.
async fn run_triage(format_output: MockLlmClient) -> (WorkflowRunResult, Harness) {
    let mut harness = Harness {
        calls: Vec::new(),
        requests: Vec::new(),
    };
    let agents = TriageAgents {
        format: executor(AgentKind::Format, format_output, &mut harness),
        investigate: executor(
            AgentKind::Investigate,
            MockLlmClient::new().with_text_response("Investigation: similar issue #3."),
            &mut harness,
        ),
        refine: executor(
            AgentKind::Refine,
            // Twice, for issues that reach refine from both branches
            MockLlmClient::new()
                .with_text_response("Refined issue body.")
                .with_text_response("Refined issue body."),
            &mut harness,
        ),
        root_cause: executor(
            AgentKind::RootCause,
            MockLlmClient::new().with_text_response("Root cause: null settings."),
            &mut harness,
        ),
    };

    let workflow = build_triage_workflow(agents, 100).unwrap();
    (workflow.run(INPUT).await, harness)
}

#[tokio::test]
async fn bug_routes_through_root_cause_then_refine() {
    let format = MockLlmClient::new().with_text_response(issue_json("santiagxf/travel-app", 8, &["bug"]));
    let (result, harness) = run_triage(format).await;

    assert_eq!(result.state, WorkflowRunState::Completed);
    assert_eq!(
        result.invoked(),
        vec!["format-agent", "root-cause-agent", "refine-agent"]
    );
    assert_eq!(harness.calls(AgentKind::Investigate), 0);
    assert_eq!(result.supersteps, 3);

    assert_eq!(result.outputs.len(), 1);
    assert_eq!(result.outputs[0].text(), "Refined issue body.");

    // refine sees the whole conversation so far
    let refine_request = harness.requests(AgentKind::Refine).last().unwrap();
    let texts: Vec<String> = refine_request.messages.iter().map(|m| m.text()).collect();
    assert_eq!(texts.len(), 4);
    assert_eq!(texts[0], "You are the refine_agent.");
    assert_eq!(texts[1], INPUT);
    assert!(texts[2].contains("\"bug\""));
    assert_eq!(texts[3], "Root cause: null settings.");
    assert_eq!(refine_request.messages[3].author.as_deref(), Some("root-cause-agent"));
}

#[tokio::test]
async fn bug_and_enhancement_reach_refine_once_per_branch() {
    let format = MockLlmClient::new().with_text_response(issue_json(
        "santiagxf/travel-app",
        8,
        &["bug", "enhancement"],
    ));
    let (result, harness) = run_triage(format).await;

    assert_eq!(result.state, WorkflowRunState::Completed);
    assert_eq!(result.supersteps, 3);
    assert_eq!(harness.calls(AgentKind::Format), 1);
    assert_eq!(harness.calls(AgentKind::Investigate), 1);
    assert_eq!(harness.calls(AgentKind::RootCause), 1);
    // No join: each incoming edge delivers its own conversation
    assert_eq!(harness.calls(AgentKind::Refine), 2);
    assert_eq!(result.outputs.len(), 2);

    let mut upstream: Vec<String> = harness
        .requests(AgentKind::Refine)
        .all()
        .iter()
        .map(|r| r.messages.last().map(|m| m.text()).unwrap_or_default())
        .collect();
    upstream.sort();
    assert_eq!(
        upstream,
        vec!["Investigation: similar issue #3.", "Root cause: null settings."]
    );
}

#[tokio::test]
async fn enhancement_routes_through_investigate_then_refine() {
    let format = MockLlmClient::new().with_text_response(issue_json(
        "santiagxf/travel-app",
        8,
        &["enhancement", "ui"],
    ));
    let (result, harness) = run_triage(format).await;

    assert_eq!(result.state, WorkflowRunState::Completed);
    assert_eq!(
        result.invoked(),
        vec!["format-agent", "investigate-agent", "refine-agent"]
    );
    assert_eq!(harness.calls(AgentKind::RootCause), 0);
    assert_eq!(harness.calls(AgentKind::Refine), 1);
    assert_eq!(result.outputs.len(), 1);
}

#[tokio::test]
async fn unlabelled_issue_stops_after_format() {
    let format = MockLlmClient::new().with_text_response(issue_json("santiagxf/travel-app", 8, &[]));
    let (result, harness) = run_triage(format).await;

    assert_eq!(result.state, WorkflowRunState::Completed);
    assert_eq!(result.invoked(), vec!["format-agent"]);
    assert!(result.outputs.is_empty());
    assert!(result
        .events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::RouteNotTaken { executor_id } if executor_id == "format-agent")));
    for kind in [AgentKind::Investigate, AgentKind::Refine, AgentKind::RootCause] {
        assert_eq!(harness.calls(kind), 0);
    }
}

#[tokio::test]
async fn unstructured_format_output_stops_after_format() {
    let format = MockLlmClient::new().with_text_response("Sorry, I could not read that issue.");
    let (result, harness) = run_triage(format).await;

    assert_eq!(result.state, WorkflowRunState::Completed);
    assert_eq!(result.invoked(), vec!["format-agent"]);
    assert_eq!(harness.calls(AgentKind::RootCause), 0);
}

#[tokio::test]
async fn format_agent_requests_issue_schema() {
    let format = MockLlmClient::new().with_text_response(issue_json("o/r", 1, &[]));
    let (_, harness) = run_triage(format).await;

    let request = harness.requests(AgentKind::Format).last().unwrap();
    match request.response_format {
        Some(ResponseFormat::JsonSchema { name, .. }) => assert_eq!(name, "GitHubIssue"),
        other => panic!("unexpected format: {:?}", other),
    }
}

#[tokio::test]
async fn format_agent_tool_call_is_fed_back_before_routing() {
    let llm = MockLlmClient::new()
        .with_tool_call("call_1", "get_issue", serde_json::json!({"issue_number": 8}))
        .with_text_response(issue_json("santiagxf/travel-app", 8, &["bug"]));
    let requests = llm.requests();

    let mut tools = ToolRegistry::new();
    let tool = pmbuddy_test_utils::MockTool::new("get_issue", r#"{"title": "Crash"}"#);
    let tool_calls = tool.call_counter();
    tools.register(tool);

    let format = AgentExecutor::new(
        AgentRuntime::new(
            AgentKind::Format.id(),
            "Format.",
            Arc::new(llm),
            ModelConfig::default(),
        )
        .with_tools(tools),
    );
    let rest = |kind: AgentKind, text: &str| {
        AgentExecutor::new(AgentRuntime::new(
            kind.id(),
            "x",
            Arc::new(MockLlmClient::new().with_text_response(text)),
            ModelConfig::default(),
        ))
    };

    let workflow = build_triage_workflow(
        TriageAgents {
            format,
            investigate: rest(AgentKind::Investigate, "inv"),
            refine: rest(AgentKind::Refine, "refined"),
            root_cause: rest(AgentKind::RootCause, "rca"),
        },
        100,
    )
    .unwrap();

    let result = workflow.run(INPUT).await;
    assert_eq!(tool_calls.get(), 1);
    assert_eq!(
        result.invoked(),
        vec!["format-agent", "root-cause-agent", "refine-agent"]
    );

    // second format call carries the tool result
    let second = &requests.all()[1];
    let fed_back = second.messages.iter().any(|m| {
        m.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "call_1"))
    });
    assert!(fed_back);
}

#[tokio::test]
async fn agent_failure_fails_the_workflow() {
    let format = MockLlmClient::new().with_deltas(vec![
        StreamDelta::TextDelta(issue_json("o/r", 1, &["bug"])),
        StreamDelta::Stop(StopReason::EndTurn),
    ]);
    let mut harness = Harness {
        calls: Vec::new(),
        requests: Vec::new(),
    };
    let agents = TriageAgents {
        format: executor(AgentKind::Format, format, &mut harness),
        investigate: executor(AgentKind::Investigate, MockLlmClient::new(), &mut harness),
        refine: executor(AgentKind::Refine, MockLlmClient::new(), &mut harness),
        // empty script: the mock errors on first use
        root_cause: executor(AgentKind::RootCause, MockLlmClient::new(), &mut harness),
    };

    let result = build_triage_workflow(agents, 100).unwrap().run(INPUT).await;
    assert_eq!(result.state, WorkflowRunState::Failed);
    assert!(result.error.as_deref().unwrap().starts_with("root-cause-agent"));
    assert_eq!(harness.calls(AgentKind::Refine), 0);
}
