use std::future::Future;

use tracing::{debug, warn};

use rmcp::handler::client::ClientHandler;
use rmcp::model::*;
use rmcp::service::NotificationContext;
use rmcp::RoleClient;

/// Client-side handler for one agent's MCP connection. Server
/// notifications are only logged.
pub struct PmBuddyClientHandler {
    server_name: String,
}

impl PmBuddyClientHandler {
    pub fn new(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
        }
    }
}

#[allow(clippy::manual_async_fn)]
impl ClientHandler for PmBuddyClientHandler {
    fn on_tool_list_changed(
        &self,
        _ctx: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        async {
            // The agent's tool set is fixed once loaded
            warn!(server = %self.server_name, "MCP tool list changed; ignoring until restart");
        }
    }

    fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _ctx: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        async move {
            debug!(server = %self.server_name, level = ?params.level, "MCP log: {}", params.data);
        }
    }

    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            meta: None,
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "pm-buddy".into(),
                title: None,
                version: env!("CARGO_PKG_VERSION").into(),
                description: None,
                icons: None,
                website_url: None,
            },
        }
    }
}
