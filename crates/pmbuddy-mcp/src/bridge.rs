use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use rmcp::model::Tool as McpTool;

use pmbuddy_core::error::Result;
use pmbuddy_core::traits::Tool;
use pmbuddy_core::types::{ToolContext, ToolResult};
use pmbuddy_tools::ToolRegistry;

use crate::McpClientManager;

/// A registry tool backed by a tool on an MCP server.
///
/// The model sees the server's own tool name; each agent has its own
/// connection, so names cannot collide across servers.
pub struct McpBridgedTool {
    server_name: String,
    tool_name: String,
    description: String,
    schema: serde_json::Value,
    manager: Arc<McpClientManager>,
    timeout: u64,
}

impl Tool for McpBridgedTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            debug!(
                server = %self.server_name,
                tool = %self.tool_name,
                agent = %ctx.agent_id,
                "Calling MCP tool"
            );

            let arguments = input.as_object().cloned();
            match self
                .manager
                .call_tool(&self.server_name, &self.tool_name, arguments)
                .await
            {
                Ok(result) => Ok(result),
                Err(e) => Ok(ToolResult::error(e.to_string())),
            }
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout
    }
}

/// Register MCP tools into the registry, in the order given.
pub fn register_mcp_tools(
    registry: &mut ToolRegistry,
    manager: &Arc<McpClientManager>,
    server_name: &str,
    tools: &[McpTool],
    timeout_secs: u64,
) {
    for tool in tools {
        let description = tool
            .description
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_else(|| format!("MCP tool: {}", tool.name));

        let schema = serde_json::to_value(&*tool.input_schema)
            .unwrap_or(serde_json::json!({"type": "object"}));

        registry.register(McpBridgedTool {
            server_name: server_name.to_string(),
            tool_name: tool.name.to_string(),
            description,
            schema,
            manager: manager.clone(),
            timeout: timeout_secs,
        });
        debug!(server = %server_name, tool = %tool.name, "Registered MCP bridged tool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bridged_tool_reports_errors_as_results() {
        let manager = Arc::new(McpClientManager::new());
        let tool = McpBridgedTool {
            server_name: "format-agent".into(),
            tool_name: "get_issue".into(),
            description: "Get an issue".into(),
            schema: serde_json::json!({"type": "object"}),
            manager,
            timeout: 5,
        };

        let ctx = ToolContext {
            run_id: pmbuddy_core::types::RunId::new(),
            agent_id: "format-agent".into(),
        };
        let result = tool.execute(serde_json::json!({}), ctx).await.unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("not connected"));
        assert_eq!(tool.timeout_secs(), 5);
    }
}
