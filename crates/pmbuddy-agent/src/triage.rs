use pmbuddy_core::error::Result;

use crate::agents::AgentKind;
use crate::executor::AgentExecutor;
use crate::workflow::{has_label_condition, Workflow, WorkflowBuilder};

pub const TRIAGE_WORKFLOW_NAME: &str = "pm-buddy";

/// The four executors of the triage pipeline.
pub struct TriageAgents {
    pub format: AgentExecutor,
    pub investigate: AgentExecutor,
    pub refine: AgentExecutor,
    pub root_cause: AgentExecutor,
}

/// Wire the triage graph.
///
/// `format` starts; issues labelled `enhancement` go to `investigate`,
/// issues labelled `bug` go to `root_cause`, and both feed `refine`.
pub fn build_triage_workflow(agents: TriageAgents, max_supersteps: usize) -> Result<Workflow> {
    let format = AgentKind::Format.id();
    let investigate = AgentKind::Investigate.id();
    let refine = AgentKind::Refine.id();
    let root_cause = AgentKind::RootCause.id();

    WorkflowBuilder::new(TRIAGE_WORKFLOW_NAME)
        .add_executor(agents.format)
        .add_executor(agents.investigate)
        .add_executor(agents.refine)
        .add_executor(agents.root_cause)
        .set_start_executor(format)
        .add_conditional_edge(format, investigate, has_label_condition("enhancement"))
        .add_conditional_edge(format, root_cause, has_label_condition("bug"))
        .add_edge(investigate, refine)
        .add_edge(root_cause, refine)
        .with_max_supersteps(max_supersteps)
        .build()
}
