use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

use pmbuddy_core::types::RunId;

use super::edge::{Edge, EdgeDescription};
use super::message::WorkflowMessage;
use super::Executor;
use crate::agent_loop::AgentRunResponse;

/// Final state of a workflow run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunState {
    #[default]
    Idle,
    Completed,
    Failed,
}

/// Everything observable about a run, in the order it happened.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted {
        run_id: RunId,
    },
    SuperstepStarted {
        superstep: usize,
        deliveries: usize,
    },
    ExecutorInvoked {
        executor_id: String,
    },
    ExecutorCompleted {
        executor_id: String,
    },
    /// An agent executor finished one agent run.
    AgentRun {
        executor_id: String,
        response: AgentRunResponse,
    },
    /// Every outgoing edge declined the message.
    RouteNotTaken {
        executor_id: String,
    },
    WorkflowOutput {
        executor_id: String,
        message: WorkflowMessage,
    },
    ExecutorFailed {
        executor_id: String,
        error: String,
    },
    WorkflowStatus {
        state: WorkflowRunState,
    },
}

/// Result of [`Workflow::run`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRunResult {
    pub run_id: RunId,
    pub events: Vec<WorkflowEvent>,
    pub outputs: Vec<WorkflowMessage>,
    pub state: WorkflowRunState,
    pub error: Option<String>,
    pub supersteps: usize,
}

impl WorkflowRunResult {
    /// Executor ids in invocation order.
    pub fn invoked(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                WorkflowEvent::ExecutorInvoked { executor_id } => Some(executor_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Agent runs as `(executor_id, response)` pairs.
    pub fn agent_runs(&self) -> impl Iterator<Item = (&str, &AgentRunResponse)> {
        self.events.iter().filter_map(|e| match e {
            WorkflowEvent::AgentRun {
                executor_id,
                response,
            } => Some((executor_id.as_str(), response)),
            _ => None,
        })
    }
}

/// Serializable shape of a workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDescription {
    pub name: String,
    pub start_executor: String,
    pub executors: Vec<String>,
    pub edges: Vec<EdgeDescription>,
    pub max_supersteps: usize,
}

/// A validated executor graph. Build one with
/// [`WorkflowBuilder`](super::WorkflowBuilder).
pub struct Workflow {
    name: String,
    executors: HashMap<String, Arc<dyn Executor>>,
    order: Vec<String>,
    edges: Vec<Edge>,
    start: String,
    max_supersteps: usize,
}

impl Workflow {
    pub(crate) fn new(
        name: String,
        executors: Vec<Arc<dyn Executor>>,
        edges: Vec<Edge>,
        start: String,
        max_supersteps: usize,
    ) -> Self {
        let order = executors.iter().map(|e| e.id().to_string()).collect();
        let executors = executors
            .into_iter()
            .map(|e| (e.id().to_string(), e))
            .collect();
        Self {
            name,
            executors,
            order,
            edges,
            start,
            max_supersteps,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn describe(&self) -> WorkflowDescription {
        WorkflowDescription {
            name: self.name.clone(),
            start_executor: self.start.clone(),
            executors: self.order.clone(),
            edges: self.edges.iter().map(EdgeDescription::from).collect(),
            max_supersteps: self.max_supersteps,
        }
    }

    /// Run the workflow to completion starting from `input`.
    ///
    /// Executor failures end the run in [`WorkflowRunState::Failed`] and are
    /// reported in the result rather than as an error.
    pub async fn run(&self, input: impl Into<WorkflowMessage>) -> WorkflowRunResult {
        let run_id = RunId::new();
        let span = info_span!(
            "pm-buddy-workflow",
            gen_ai.system = "agent-framework",
            gen_ai.operation.name = "invoke_agent",
            otel.kind = "client",
            workflow = %self.name,
            run_id = %run_id,
        );
        self.run_supersteps(run_id, input.into())
            .instrument(span)
            .await
    }

    async fn run_supersteps(&self, run_id: RunId, input: WorkflowMessage) -> WorkflowRunResult {
        info!(start = %self.start, "Workflow started");

        let mut events = vec![WorkflowEvent::WorkflowStarted {
            run_id: run_id.clone(),
        }];
        let mut outputs = Vec::new();
        let mut pending = vec![(self.start.clone(), input)];
        let mut superstep = 0;
        let mut failure: Option<String> = None;

        while !pending.is_empty() {
            if superstep >= self.max_supersteps {
                let msg = format!(
                    "workflow exceeded {} supersteps with {} undelivered message(s)",
                    self.max_supersteps,
                    pending.len()
                );
                warn!(max_supersteps = self.max_supersteps, "Superstep ceiling reached");
                failure = Some(msg);
                break;
            }
            superstep += 1;

            events.push(WorkflowEvent::SuperstepStarted {
                superstep,
                deliveries: pending.len(),
            });
            for (target, _) in &pending {
                events.push(WorkflowEvent::ExecutorInvoked {
                    executor_id: target.clone(),
                });
            }

            let deliveries = pending.drain(..).map(|(target, message)| {
                let executor = self.executors.get(&target).cloned();
                let run_id = run_id.clone();
                async move {
                    let result = match executor {
                        Some(executor) => executor.handle(message, run_id).await,
                        None => Err(pmbuddy_core::PmBuddyError::Workflow(format!(
                            "unknown executor '{}'",
                            target
                        ))),
                    };
                    (target, result)
                }
            });
            let results = join_all(deliveries).await;

            let mut next = Vec::new();
            for (source, result) in results {
                match result {
                    Ok(messages) => {
                        events.push(WorkflowEvent::ExecutorCompleted {
                            executor_id: source.clone(),
                        });
                        for message in messages {
                            if let Some(response) = message.as_agent_response() {
                                events.push(WorkflowEvent::AgentRun {
                                    executor_id: source.clone(),
                                    response: response.agent_run_response.clone(),
                                });
                            }
                            self.route(&source, message, &mut next, &mut events, &mut outputs);
                        }
                    }
                    Err(e) => {
                        error!(executor = %source, error = %e, "Executor failed");
                        events.push(WorkflowEvent::ExecutorFailed {
                            executor_id: source.clone(),
                            error: e.to_string(),
                        });
                        failure.get_or_insert_with(|| format!("{}: {}", source, e));
                    }
                }
            }

            if failure.is_some() {
                break;
            }
            pending = next;
        }

        let state = if failure.is_some() {
            WorkflowRunState::Failed
        } else {
            WorkflowRunState::Completed
        };
        events.push(WorkflowEvent::WorkflowStatus { state });
        info!(
            state = ?state,
            supersteps = superstep,
            outputs = outputs.len(),
            "Workflow finished"
        );

        WorkflowRunResult {
            run_id,
            events,
            outputs,
            state,
            error: failure,
            supersteps: superstep,
        }
    }

    fn route(
        &self,
        source: &str,
        message: WorkflowMessage,
        next: &mut Vec<(String, WorkflowMessage)>,
        events: &mut Vec<WorkflowEvent>,
        outputs: &mut Vec<WorkflowMessage>,
    ) {
        let outgoing: Vec<&Edge> = self.edges.iter().filter(|e| e.from == source).collect();

        if outgoing.is_empty() {
            events.push(WorkflowEvent::WorkflowOutput {
                executor_id: source.to_string(),
                message: message.clone(),
            });
            outputs.push(message);
            return;
        }

        let mut taken = 0;
        for edge in outgoing {
            if edge.condition.evaluate(&message) {
                info!(from = %edge.from, to = %edge.to, condition = %edge.condition.describe(), "Edge taken");
                next.push((edge.to.clone(), message.clone()));
                taken += 1;
            }
        }

        if taken == 0 {
            info!(executor = %source, "No edge condition held, route not taken");
            events.push(WorkflowEvent::RouteNotTaken {
                executor_id: source.to_string(),
            });
        }
    }
}
