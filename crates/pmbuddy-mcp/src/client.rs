use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use rmcp::model::{CallToolRequestParams, RawContent, Tool as McpTool};
use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::{
    StreamableHttpClientTransport, StreamableHttpClientTransportConfig,
};
use rmcp::{Peer, RoleClient, ServiceExt};

use pmbuddy_core::config::{McpServerConfig, McpTransport};
use pmbuddy_core::error::{PmBuddyError, Result};
use pmbuddy_core::types::ToolResult;

use crate::handler::PmBuddyClientHandler;

type McpConnection = RunningService<RoleClient, PmBuddyClientHandler>;

/// Manages named MCP server connections.
///
/// The map lock is only held to look up or swap a connection. Requests run
/// on a cloned [`Peer`], so calls to different servers (or concurrent calls
/// to one server) proceed in parallel.
#[derive(Default)]
pub struct McpClientManager {
    connections: Mutex<HashMap<String, McpConnection>>,
    server_configs: Mutex<HashMap<String, McpServerConfig>>,
}

/// Build the HTTP client carrying the server's custom headers.
pub(crate) fn http_client(headers: &HashMap<String, String>) -> Result<reqwest::Client> {
    let mut map = http::HeaderMap::new();
    for (k, v) in headers {
        let name = http::HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| PmBuddyError::Mcp(format!("Invalid header name '{}': {}", k, e)))?;
        let mut value = http::HeaderValue::from_str(v)
            .map_err(|e| PmBuddyError::Mcp(format!("Invalid value for header '{}': {}", k, e)))?;
        if name == http::header::AUTHORIZATION {
            value.set_sensitive(true);
        }
        map.insert(name, value);
    }

    reqwest::Client::builder()
        .default_headers(map)
        .build()
        .map_err(|e| PmBuddyError::Mcp(format!("Failed to build HTTP client: {}", e)))
}

impl McpClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to an MCP server under `name`, replacing any previous connection.
    pub async fn connect(&self, name: &str, config: &McpServerConfig) -> Result<()> {
        let handler = PmBuddyClientHandler::new(name);

        let client = match &config.transport {
            McpTransport::Stdio { command, args, env } => {
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(args);
                for (k, v) in env {
                    cmd.env(k, v);
                }

                let transport = rmcp::transport::TokioChildProcess::new(cmd).map_err(|e| {
                    PmBuddyError::Mcp(format!("Failed to spawn {}: {}", command, e))
                })?;

                handler.serve(transport).await.map_err(|e| {
                    PmBuddyError::Mcp(format!("MCP init for '{}' failed: {}", name, e))
                })?
            }
            McpTransport::Http { url } => {
                let transport = StreamableHttpClientTransport::with_client(
                    http_client(&config.headers)?,
                    StreamableHttpClientTransportConfig::with_uri(url.as_str()),
                );

                <PmBuddyClientHandler as ServiceExt<RoleClient>>::serve(handler, transport)
                    .await
                    .map_err(|e| {
                        PmBuddyError::Mcp(format!("MCP init for '{}' failed: {}", name, e))
                    })?
            }
        };

        info!(server = %name, "MCP server connected");

        self.attach(name, client).await;
        self.server_configs
            .lock()
            .await
            .insert(name.to_string(), config.clone());
        Ok(())
    }

    /// Store an initialized connection under `name`, closing the one it replaces.
    pub(crate) async fn attach(&self, name: &str, client: McpConnection) {
        let replaced = self
            .connections
            .lock()
            .await
            .insert(name.to_string(), client);
        if let Some(mut old) = replaced {
            let _ = old.close().await;
        }
    }

    async fn peer(&self, server_name: &str) -> Result<Peer<RoleClient>> {
        self.connections
            .lock()
            .await
            .get(server_name)
            .map(|c| c.peer().clone())
            .ok_or_else(|| not_connected(server_name))
    }

    /// Reconnect a server using its stored config.
    pub async fn reconnect(&self, server_name: &str) -> Result<()> {
        let config = self
            .server_configs
            .lock()
            .await
            .get(server_name)
            .cloned()
            .ok_or_else(|| {
                PmBuddyError::Mcp(format!("No stored config for server '{}'", server_name))
            })?;

        self.disconnect(server_name).await;
        self.connect(server_name, &config).await
    }

    pub async fn is_connected(&self, server_name: &str) -> bool {
        self.connections
            .lock()
            .await
            .get(server_name)
            .map(|c| !c.is_closed())
            .unwrap_or(false)
    }

    /// List every tool a connected server exposes.
    pub async fn list_tools(&self, server_name: &str) -> Result<Vec<McpTool>> {
        let peer = self.peer(server_name).await?;

        let tools = peer.list_all_tools().await.map_err(|e| {
            PmBuddyError::Mcp(format!("Failed to list tools from '{}': {}", server_name, e))
        })?;

        debug!(server = %server_name, count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    /// Call a tool, reconnecting once if the transport was closed.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<ToolResult> {
        match self
            .call_tool_inner(server_name, tool_name, arguments.clone())
            .await
        {
            Err(e) if is_transport_closed(&e) => {
                warn!(server = %server_name, "MCP transport closed, attempting reconnect");
                self.reconnect(server_name).await?;
                self.call_tool_inner(server_name, tool_name, arguments).await
            }
            other => other,
        }
    }

    async fn call_tool_inner(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<ToolResult> {
        let peer = self.peer(server_name).await?;

        let params = CallToolRequestParams {
            name: tool_name.to_string().into(),
            arguments,
            meta: None,
            task: None,
        };

        let result = peer.call_tool(params).await.map_err(|e| {
            PmBuddyError::Mcp(format!(
                "Tool call '{}.{}' failed: {}",
                server_name, tool_name, e
            ))
        })?;

        let content: Vec<String> = result
            .content
            .iter()
            .map(|c| match c.raw {
                RawContent::Text(ref t) => t.text.to_string(),
                _ => format!("{:?}", c.raw),
            })
            .collect();
        let content = content.join("\n");

        if result.is_error.unwrap_or(false) {
            Ok(ToolResult::error(content))
        } else {
            Ok(ToolResult::success(content))
        }
    }

    pub async fn disconnect(&self, server_name: &str) {
        let removed = self.connections.lock().await.remove(server_name);
        if let Some(mut client) = removed {
            let _ = client.close().await;
            info!(server = %server_name, "MCP server disconnected");
        }
    }

    pub async fn disconnect_all(&self) {
        let drained: Vec<(String, McpConnection)> =
            self.connections.lock().await.drain().collect();
        for (name, mut client) in drained {
            let _ = client.close().await;
            info!(server = %name, "MCP server disconnected");
        }
    }
}

fn not_connected(server_name: &str) -> PmBuddyError {
    PmBuddyError::Mcp(format!("Server '{}' not connected", server_name))
}

fn is_transport_closed(e: &PmBuddyError) -> bool {
    match e {
        PmBuddyError::Mcp(msg) => msg.contains("closed") || msg.contains("Transport"),
        _ => false,
    }
}
