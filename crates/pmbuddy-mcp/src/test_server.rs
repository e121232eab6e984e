//! In-process MCP server served over a duplex pipe.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Barrier;

use rmcp::model::*;
use rmcp::service::RequestContext;
use rmcp::{ErrorData, RoleClient, RoleServer, ServerHandler, ServiceExt};

use crate::handler::PmBuddyClientHandler;
use crate::McpClientManager;

/// Lists a fixed set of tools and echoes `tool_name:arguments` on call.
///
/// With a barrier set, every call waits until `n` calls are in flight.
pub(crate) struct IssueServer {
    tools: Vec<&'static str>,
    barrier: Option<Arc<Barrier>>,
}

impl IssueServer {
    pub(crate) fn new(tools: &[&'static str]) -> Self {
        Self {
            tools: tools.to_vec(),
            barrier: None,
        }
    }

    pub(crate) fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }
}

#[allow(clippy::manual_async_fn)]
impl ServerHandler for IssueServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        async move {
            let tools = self
                .tools
                .iter()
                .map(|name| {
                    let schema = serde_json::json!({"type": "object"});
                    let schema = schema.as_object().cloned().unwrap_or_default();
                    Tool::new(*name, format!("{} tool", name), Arc::new(schema))
                })
                .collect();
            Ok(ListToolsResult::with_all_items(tools))
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            let args = serde_json::Value::Object(request.arguments.unwrap_or_default());
            Ok(CallToolResult::success(vec![Content::text(format!(
                "{}:{}",
                request.name, args
            ))]))
        }
    }
}

/// Serve `server` in the background and attach a client for it under `name`.
pub(crate) async fn attach(manager: &McpClientManager, name: &str, server: IssueServer) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        if let Ok(running) = <IssueServer as ServiceExt<RoleServer>>::serve(server, server_io).await
        {
            let _ = running.waiting().await;
        }
    });

    let client = <PmBuddyClientHandler as ServiceExt<RoleClient>>::serve(
        PmBuddyClientHandler::new(name),
        client_io,
    )
    .await
    .expect("initialize in-process MCP client");

    manager.attach(name, client).await;
}
