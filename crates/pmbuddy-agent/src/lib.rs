pub mod agent_loop;
pub mod agents;
pub mod executor;
pub mod prompts;
pub mod triage;
pub mod workflow;

pub use agent_loop::{AgentRunResponse, AgentRuntime};
pub use agents::{AgentKind, TokenScope};
pub use executor::{AgentExecutor, AgentExecutorResponse};
pub use prompts::load_prompt;
pub use triage::{build_triage_workflow, TriageAgents, TRIAGE_WORKFLOW_NAME};
pub use workflow::{
    has_label_condition, message_has_label, Edge, EdgeCondition, Executor, Workflow,
    WorkflowBuilder, WorkflowDescription, WorkflowEvent, WorkflowMessage, WorkflowRunResult,
    WorkflowRunState,
};
