use std::sync::Arc;

use tracing::debug;

use pmbuddy_core::error::{PmBuddyError, Result};
use pmbuddy_core::traits::Tool;
use pmbuddy_core::types::{ToolContext, ToolDefinition, ToolResult};

/// Registry of tools available to one agent.
///
/// Tools keep their registration order, which is the order the model sees
/// them in. Registering a name twice replaces the earlier tool in place.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        self.register_arc(Arc::new(tool));
    }

    /// Register an already shared tool.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(idx) => {
                debug!(tool = tool.name(), "Replacing registered tool");
                self.tools[idx] = tool;
            }
            None => self.tools.push(tool),
        }
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.tools.len();
        self.tools.retain(|t| t.name() != name);
        self.tools.len() != before
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// Registered tool names, in registration order.
    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get tool definitions for sending to the LLM.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name, bounded by the tool's own timeout.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| PmBuddyError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());

        match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(PmBuddyError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use pmbuddy_core::types::RunId;
    use pmbuddy_test_utils::MockTool;

    fn ctx() -> ToolContext {
        ToolContext {
            run_id: RunId::new(),
            agent_id: "test-agent".into(),
        }
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new("search_issues", "[]"));
        registry.register(MockTool::new("get_issue", "{}"));
        registry.register(MockTool::new("get_file_contents", ""));

        assert_eq!(
            registry.list(),
            ["search_issues", "get_issue", "get_file_contents"]
        );
        let defs = registry.definitions();
        assert_eq!(defs[1].name, "get_issue");
    }

    #[test]
    fn test_duplicate_name_replaces_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new("a", "first"));
        registry.register(MockTool::new("b", ""));
        registry.register(MockTool::new("a", "second"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.list(), ["a", "b"]);
    }

    #[test]
    fn test_unregister() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new("a", ""));
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let result = registry
            .execute("missing", serde_json::json!({}), ctx())
            .await;
        assert!(matches!(result, Err(PmBuddyError::ToolNotFound(n)) if n == "missing"));
    }

    #[tokio::test]
    async fn test_execute_records_input() {
        let tool = MockTool::new("get_issue", "{\"title\":\"x\"}");
        let inputs = tool.inputs();
        let mut registry = ToolRegistry::new();
        registry.register(tool);

        let result = registry
            .execute("get_issue", serde_json::json!({"issue_number": 3}), ctx())
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, "{\"title\":\"x\"}");
        assert_eq!(inputs.lock().unwrap()[0]["issue_number"], 3);
    }

    struct SlowTool;

    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: ToolContext,
        ) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok(ToolResult::success("late"))
            })
        }
        fn timeout_secs(&self) -> u64 {
            1
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let result = registry.execute("slow", serde_json::json!({}), ctx()).await;
        assert!(matches!(
            result,
            Err(PmBuddyError::ToolTimeout { timeout_secs: 1, .. })
        ));
    }
}
