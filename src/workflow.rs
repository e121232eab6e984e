use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use pmbuddy_agent::{
    build_triage_workflow, load_prompt, AgentExecutor, AgentKind, AgentRuntime, TokenScope,
    TriageAgents, Workflow,
};
use pmbuddy_core::config::AppConfig;
use pmbuddy_core::event::EventBus;
use pmbuddy_core::traits::LlmClient;
use pmbuddy_github::AgentTokens;
use pmbuddy_mcp::{connect_and_register, McpClientManager};
use pmbuddy_tools::ToolRegistry;

/// Shared collaborators every triage agent is built from.
pub struct AgentDeps<'a> {
    pub config: &'a AppConfig,
    pub tokens: &'a AgentTokens,
    pub llm: Arc<dyn LlmClient>,
    pub mcp: Arc<McpClientManager>,
    pub event_bus: Arc<EventBus>,
}

impl AgentDeps<'_> {
    fn token_for(&self, scope: TokenScope) -> &str {
        match scope {
            TokenScope::App => &self.tokens.app_token,
            TokenScope::User => &self.tokens.user_token,
        }
    }

    /// Load the agent's prompt, connect its MCP session, and keep the tools
    /// its filter allows.
    async fn build_agent(&self, kind: AgentKind) -> anyhow::Result<AgentExecutor> {
        let instructions = load_prompt(&self.config.prompts_dir(), kind.prompt_name())
            .with_context(|| format!("loading the {} prompt", kind))?;

        let server = self.config.github.mcp_server(self.token_for(kind.token_scope()));
        let mut tools = ToolRegistry::new();
        connect_and_register(&self.mcp, kind.id(), &server, &kind.tool_filter(), &mut tools)
            .await
            .with_context(|| format!("connecting {} to the GitHub MCP server", kind))?;

        info!(agent = %kind, tools = ?tools.list(), "Agent ready");

        let runtime = AgentRuntime::new(
            kind.id(),
            instructions,
            self.llm.clone(),
            self.config.model.clone(),
        )
        .with_tools(tools)
        .with_response_format(kind.response_format())
        .with_config(self.config.agent.clone())
        .with_event_bus(self.event_bus.clone());

        Ok(AgentExecutor::new(runtime))
    }
}

/// Build the four triage agents and wire them into the workflow.
pub async fn build(deps: &AgentDeps<'_>) -> anyhow::Result<Workflow> {
    // Fail on a missing prompt before opening any MCP session.
    for kind in AgentKind::ALL {
        load_prompt(&deps.config.prompts_dir(), kind.prompt_name())
            .with_context(|| format!("loading the {} prompt", kind))?;
    }

    info!("Building agent workflow");
    let agents = TriageAgents {
        format: deps.build_agent(AgentKind::Format).await?,
        investigate: deps.build_agent(AgentKind::Investigate).await?,
        refine: deps.build_agent(AgentKind::Refine).await?,
        root_cause: deps.build_agent(AgentKind::RootCause).await?,
    };

    Ok(build_triage_workflow(
        agents,
        deps.config.workflow.max_supersteps,
    )?)
}

/// Mint a fresh installation token and reopen every app-scoped agent's MCP
/// session with it. Bridged tools address sessions by name, so the running
/// workflow picks up the new sessions.
pub async fn refresh_app_sessions(
    config: &AppConfig,
    mcp: &McpClientManager,
) -> anyhow::Result<AgentTokens> {
    let tokens = AgentTokens::resolve(&config.github, |key| std::env::var(key).ok()).await?;
    let server = config.github.mcp_server(&tokens.app_token);
    for kind in AgentKind::ALL {
        if kind.token_scope() == TokenScope::App {
            mcp.connect(kind.id(), &server)
                .await
                .with_context(|| format!("reconnecting {} with a fresh token", kind))?;
        }
    }
    info!(expires_at = ?tokens.app_token_expires_at, "GitHub App token refreshed");
    Ok(tokens)
}
