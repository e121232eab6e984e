use std::collections::HashSet;
use std::sync::Arc;

use pmbuddy_core::error::{PmBuddyError, Result};

use super::edge::{Edge, EdgeCondition};
use super::runner::Workflow;
use super::Executor;

pub const DEFAULT_MAX_SUPERSTEPS: usize = 100;

/// Fluent construction of a [`Workflow`], validated on [`build`](Self::build).
pub struct WorkflowBuilder {
    name: String,
    executors: Vec<Arc<dyn Executor>>,
    start: Option<String>,
    edges: Vec<Edge>,
    max_supersteps: usize,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executors: Vec::new(),
            start: None,
            edges: Vec::new(),
            max_supersteps: DEFAULT_MAX_SUPERSTEPS,
        }
    }

    pub fn add_executor(self, executor: impl Executor) -> Self {
        self.add_executor_arc(Arc::new(executor))
    }

    pub fn add_executor_arc(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executors.push(executor);
        self
    }

    pub fn set_start_executor(mut self, id: impl Into<String>) -> Self {
        self.start = Some(id.into());
        self
    }

    /// Unconditional edge.
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::always(from, to));
        self
    }

    pub fn add_conditional_edge(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: EdgeCondition,
    ) -> Self {
        self.edges.push(Edge::conditional(from, to, condition));
        self
    }

    pub fn with_max_supersteps(mut self, max: usize) -> Self {
        self.max_supersteps = max.max(1);
        self
    }

    pub fn build(self) -> Result<Workflow> {
        let mut ids = HashSet::new();
        for executor in &self.executors {
            if !ids.insert(executor.id().to_string()) {
                return Err(PmBuddyError::Workflow(format!(
                    "duplicate executor id '{}'",
                    executor.id()
                )));
            }
        }

        let start = self
            .start
            .ok_or_else(|| PmBuddyError::Workflow("no start executor set".into()))?;
        if !ids.contains(&start) {
            return Err(PmBuddyError::Workflow(format!(
                "start executor '{}' is not registered",
                start
            )));
        }

        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !ids.contains(endpoint) {
                    return Err(PmBuddyError::Workflow(format!(
                        "edge {} -> {} references unknown executor '{}'",
                        edge.from, edge.to, endpoint
                    )));
                }
            }
        }

        Ok(Workflow::new(
            self.name,
            self.executors,
            self.edges,
            start,
            self.max_supersteps,
        ))
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new("workflow")
    }
}
