mod bridge;
mod client;
mod filter;
mod handler;
#[cfg(test)]
mod test_server;

pub use bridge::{register_mcp_tools, McpBridgedTool};
pub use client::McpClientManager;
pub use filter::{filter_tools, NamedTool, ToolFilter};
pub use handler::PmBuddyClientHandler;

use std::sync::Arc;

use tracing::info;

use pmbuddy_core::config::McpServerConfig;
use pmbuddy_core::error::Result;
use pmbuddy_tools::ToolRegistry;

/// Connect to an MCP server, keep the tools `filter` allows, and register
/// them into the registry. Returns the number of tools registered.
pub async fn connect_and_register(
    manager: &Arc<McpClientManager>,
    server_name: &str,
    config: &McpServerConfig,
    filter: &ToolFilter,
    registry: &mut ToolRegistry,
) -> Result<usize> {
    manager.connect(server_name, config).await?;
    register_server_tools(manager, server_name, filter, config.timeout_secs, registry).await
}

/// List a connected server's tools and register the ones `filter` allows,
/// in the order the server lists them.
pub async fn register_server_tools(
    manager: &Arc<McpClientManager>,
    server_name: &str,
    filter: &ToolFilter,
    timeout_secs: u64,
    registry: &mut ToolRegistry,
) -> Result<usize> {
    let tools = manager.list_tools(server_name).await?;
    let available = tools.len();
    let tools = filter_tools(tools, filter);

    bridge::register_mcp_tools(registry, manager, server_name, &tools, timeout_secs);

    info!(
        server = %server_name,
        available,
        registered = tools.len(),
        "Loaded MCP tools"
    );
    Ok(tools.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::sync::Barrier;

    use pmbuddy_core::types::{RunId, ToolContext};

    use crate::test_server::{attach, IssueServer};

    fn ctx(agent: &str) -> ToolContext {
        ToolContext {
            run_id: RunId::new(),
            agent_id: agent.into(),
        }
    }

    #[tokio::test]
    async fn test_filter_applies_when_tools_load() {
        let manager = Arc::new(McpClientManager::new());
        attach(
            &manager,
            "format-agent",
            IssueServer::new(&[
                "update_issue",
                "search_code",
                "get_issue",
                "list_commits",
                "add_issue_comment",
            ]),
        )
        .await;

        let mut registry = ToolRegistry::new();
        let registered = register_server_tools(
            &manager,
            "format-agent",
            &ToolFilter::name_contains_any(&["issue"]),
            30,
            &mut registry,
        )
        .await
        .unwrap();

        assert_eq!(registered, 3);
        assert_eq!(
            registry.list(),
            vec!["update_issue", "get_issue", "add_issue_comment"]
        );
        assert!(registry.get("search_code").is_none());

        let result = registry
            .execute("get_issue", serde_json::json!({"issue_number": 8}), ctx("format-agent"))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, r#"get_issue:{"issue_number":8}"#);
    }

    #[tokio::test]
    async fn test_all_filter_keeps_every_tool() {
        let manager = Arc::new(McpClientManager::new());
        attach(&manager, "refine-agent", IssueServer::new(&["b_tool", "a_tool"])).await;

        let mut registry = ToolRegistry::new();
        register_server_tools(&manager, "refine-agent", &ToolFilter::All, 30, &mut registry)
            .await
            .unwrap();
        assert_eq!(registry.list(), vec!["b_tool", "a_tool"]);
    }

    #[tokio::test]
    async fn test_calls_to_different_servers_run_concurrently() {
        // Each call blocks until both are in flight, so serialized calls never finish.
        let barrier = Arc::new(Barrier::new(2));
        let manager = Arc::new(McpClientManager::new());
        attach(
            &manager,
            "investigate-agent",
            IssueServer::new(&["get_issue"]).with_barrier(barrier.clone()),
        )
        .await;
        attach(
            &manager,
            "root-cause-agent",
            IssueServer::new(&["get_issue"]).with_barrier(barrier),
        )
        .await;

        let both = async {
            tokio::join!(
                manager.call_tool("investigate-agent", "get_issue", None),
                manager.call_tool("root-cause-agent", "get_issue", None),
            )
        };
        let (a, b) = tokio::time::timeout(Duration::from_secs(10), both)
            .await
            .expect("MCP calls were serialized");
        assert_eq!(a.unwrap().content, "get_issue:{}");
        assert_eq!(b.unwrap().content, "get_issue:{}");
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_server() {
        let barrier = Arc::new(Barrier::new(2));
        let manager = Arc::new(McpClientManager::new());
        attach(
            &manager,
            "format-agent",
            IssueServer::new(&["get_issue", "list_issues"]).with_barrier(barrier),
        )
        .await;

        let both = async {
            tokio::join!(
                manager.call_tool("format-agent", "get_issue", None),
                manager.call_tool("format-agent", "list_issues", None),
            )
        };
        let (a, b) = tokio::time::timeout(Duration::from_secs(10), both)
            .await
            .expect("MCP calls were serialized");
        assert_eq!(a.unwrap().content, "get_issue:{}");
        assert_eq!(b.unwrap().content, "list_issues:{}");
    }
}
