use std::sync::Arc;

use pmbuddy_agent::Workflow;
use pmbuddy_core::config::GatewayConfig;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub workflow: Arc<Workflow>,
}
