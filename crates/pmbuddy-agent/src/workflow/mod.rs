//! Superstep workflow engine.
//!
//! A workflow is a directed graph of [`Executor`]s connected by [`Edge`]s.
//! Messages produced in one superstep are delivered in the next, every
//! delivery of a step running concurrently. Edge conditions decide which
//! messages travel; an executor with no outgoing edges yields workflow
//! outputs.

pub mod builder;
pub mod edge;
pub mod message;
pub mod runner;

use futures::future::BoxFuture;

use pmbuddy_core::error::Result;
use pmbuddy_core::types::RunId;

pub use builder::WorkflowBuilder;
pub use edge::{has_label_condition, message_has_label, Edge, EdgeCondition, EdgeDescription};
pub use message::WorkflowMessage;
pub use runner::{
    Workflow, WorkflowDescription, WorkflowEvent, WorkflowRunResult, WorkflowRunState,
};

/// A node in the workflow graph.
pub trait Executor: Send + Sync + 'static {
    /// Unique id within a workflow.
    fn id(&self) -> &str;

    /// Handle one delivered message and return the messages to route onward.
    fn handle(
        &self,
        message: WorkflowMessage,
        run_id: RunId,
    ) -> BoxFuture<'_, Result<Vec<WorkflowMessage>>>;
}
