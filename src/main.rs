mod telemetry;
mod workflow;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pmbuddy_agent::{Workflow, WorkflowRunResult, WorkflowRunState};
use pmbuddy_core::config::{AppConfig, GatewayConfig};
use pmbuddy_core::event::EventBus;
use pmbuddy_core::types::AgentEvent;
use pmbuddy_github::AgentTokens;
use pmbuddy_mcp::McpClientManager;

#[derive(Parser, Debug)]
#[command(
    name = "pmbuddy",
    version,
    about = "Triage GitHub issues with a branching agent workflow"
)]
struct Cli {
    /// Path to config file; environment variables are used when it is missing
    #[arg(short, long, default_value = "pmbuddy.toml", env = "PMBUDDY_CONFIG")]
    config: PathBuf,

    /// Run the workflow once on this input and exit
    #[arg(long)]
    input: Option<String>,

    /// Serve the interactive dev UI
    #[arg(long)]
    devui: bool,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    /// Serve on this port
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Debug, PartialEq)]
enum Mode {
    Once(String),
    Serve { port: Option<u16>, devui: bool },
}

impl Cli {
    fn mode(&self) -> Option<Mode> {
        if self.devui || self.port.is_some() {
            return Some(Mode::Serve {
                port: self.port,
                devui: self.devui,
            });
        }
        self.input
            .as_ref()
            .filter(|i| !i.trim().is_empty())
            .map(|i| Mode::Once(i.clone()))
    }
}

const USAGE_HINT: &str = "Please provide an input using --input 'your issue description', \
or start the dev UI with --devui";

fn load_config(path: &Path) -> anyhow::Result<(AppConfig, bool)> {
    if path.exists() {
        Ok((AppConfig::load(path)?, true))
    } else {
        Ok((AppConfig::from_env()?, false))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let Some(mode) = cli.mode() else {
        eprintln!("{USAGE_HINT}");
        std::process::exit(1);
    };

    let (config, from_file) = load_config(&cli.config)?;
    let telemetry = telemetry::init(&config.telemetry, cli.debug)?;
    if from_file {
        info!(path = %cli.config.display(), "Loaded config");
    } else {
        warn!(
            path = %cli.config.display(),
            "No config file found, using environment variables"
        );
    }

    let result = run(mode, config).await;
    if let Err(ref e) = result {
        error!(error = %e, "PM Buddy failed");
    }
    telemetry.shutdown();
    result
}

async fn run(mode: Mode, config: AppConfig) -> anyhow::Result<()> {
    // Credentials are checked before any MCP session opens
    let llm: Arc<dyn pmbuddy_core::traits::LlmClient> =
        Arc::new(pmbuddy_llm::create_verified_client(&config.model).await?);
    let tokens = AgentTokens::resolve(&config.github, |key| std::env::var(key).ok()).await?;
    let mcp = Arc::new(McpClientManager::new());
    let event_bus = Arc::new(EventBus::default());

    let built = {
        let deps = workflow::AgentDeps {
            config: &config,
            tokens: &tokens,
            llm,
            mcp: mcp.clone(),
            event_bus: event_bus.clone(),
        };
        workflow::build(&deps).await
    };
    let workflow = match built {
        Ok(w) => w,
        Err(e) => {
            mcp.disconnect_all().await;
            return Err(e);
        }
    };

    let outcome = match mode {
        Mode::Once(input) => run_once(&workflow, &event_bus, &input, &config).await,
        Mode::Serve { port, devui } => {
            let refresher = TokenRefresher {
                config: config.clone(),
                mcp: mcp.clone(),
                tokens,
            };
            serve(workflow, refresher, port, devui).await
        }
    };

    mcp.disconnect_all().await;
    outcome
}

async fn run_once(
    workflow: &Workflow,
    event_bus: &EventBus,
    input: &str,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let done = CancellationToken::new();
    let printer = tokio::spawn(forward_tool_events(
        event_bus.subscribe(),
        done.clone(),
        |line| eprintln!("{line}"),
    ));

    let result = workflow.run(input).await;
    done.cancel();
    printer.await.ok();

    print_run(&result, config.telemetry.enable_sensitive_data);

    match result.state {
        WorkflowRunState::Failed => Err(anyhow::anyhow!(
            "workflow failed: {}",
            result.error.unwrap_or_default()
        )),
        _ => Ok(()),
    }
}

fn tool_event_line(event: &AgentEvent) -> Option<String> {
    match event {
        AgentEvent::ToolStart { agent_id, name, .. } => Some(format!("[{}] tool: {}", agent_id, name)),
        AgentEvent::ToolEnd {
            agent_id,
            name,
            result,
        } if result.is_error => Some(format!(
            "[{}] {} failed: {}",
            agent_id,
            name,
            truncate(&result.content, 200)
        )),
        _ => None,
    }
}

/// Print tool activity until `done` fires, then flush whatever is still queued.
async fn forward_tool_events(
    mut rx: Receiver<AgentEvent>,
    done: CancellationToken,
    mut print: impl FnMut(String),
) {
    loop {
        tokio::select! {
            biased;
            event = rx.recv() => match event {
                Ok(event) => {
                    if let Some(line) = tool_event_line(&event) {
                        print(line);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Tool event printer fell behind");
                }
                Err(RecvError::Closed) => return,
            },
            _ = done.cancelled() => break,
        }
    }

    loop {
        match rx.try_recv() {
            Ok(event) => {
                if let Some(line) = tool_event_line(&event) {
                    print(line);
                }
            }
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "Tool event printer fell behind");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => return,
        }
    }
}

fn print_run(result: &WorkflowRunResult, include_text: bool) {
    for (executor_id, response) in result.agent_runs() {
        println!("{}: {}", executor_id, response.text);
        if include_text {
            info!(
                executor = %executor_id,
                turns = response.turns,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                text = %response.text,
                "Agent run"
            );
        } else {
            info!(
                executor = %executor_id,
                turns = response.turns,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "Agent run"
            );
        }
    }
    println!("Final state: {:?}", result.state);
}

/// Keeps the app-scoped agents' MCP sessions on a current installation token.
struct TokenRefresher {
    config: AppConfig,
    mcp: Arc<McpClientManager>,
    tokens: AgentTokens,
}

impl TokenRefresher {
    async fn run(mut self, cancel: CancellationToken) {
        while let Some(delay) = self.tokens.refresh_delay() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            // On failure the old token is kept and the floor delay applies
            match workflow::refresh_app_sessions(&self.config, &self.mcp).await {
                Ok(tokens) => self.tokens = tokens,
                Err(e) => warn!(error = %e, "GitHub App token refresh failed"),
            }
        }
    }
}

async fn serve(
    workflow: Workflow,
    refresher: TokenRefresher,
    port: Option<u16>,
    devui: bool,
) -> anyhow::Result<()> {
    let gateway = &refresher.config.gateway;
    let config = GatewayConfig {
        port: port.unwrap_or(gateway.port),
        ..gateway.clone()
    };
    if devui {
        info!("Available at: http://localhost:{}", config.port);
    }

    let server = pmbuddy_gateway::GatewayServer::new(config, Arc::new(workflow));
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    // Graceful shutdown on Ctrl-C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down gateway...");
        cancel_clone.cancel();
    });
    tokio::spawn(refresher.run(cancel.clone()));

    server.run(cancel).await
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pmbuddy").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_input_runs_once() {
        let cli = parse(&["--input", "issue 8"]);
        assert_eq!(cli.mode(), Some(Mode::Once("issue 8".into())));
    }

    #[test]
    fn test_devui_serves_on_default_port() {
        let cli = parse(&["--devui", "--input", "ignored"]);
        assert_eq!(
            cli.mode(),
            Some(Mode::Serve {
                port: None,
                devui: true
            })
        );
    }

    #[test]
    fn test_port_serves() {
        let cli = parse(&["--port", "9000"]);
        assert_eq!(
            cli.mode(),
            Some(Mode::Serve {
                port: Some(9000),
                devui: false
            })
        );
    }

    #[test]
    fn test_no_mode_without_input() {
        assert_eq!(parse(&[]).mode(), None);
        assert_eq!(parse(&["--debug"]).mode(), None);
        assert_eq!(parse(&["--input", "  "]).mode(), None);
    }

    fn tool_start(n: usize) -> AgentEvent {
        AgentEvent::ToolStart {
            agent_id: "format-agent".into(),
            name: format!("tool_{n}"),
            input: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_printer_flushes_queued_events_after_done() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        for n in 0..3 {
            bus.publish(tool_start(n));
        }
        let done = CancellationToken::new();
        done.cancel();

        let mut lines = Vec::new();
        forward_tool_events(rx, done, |line| lines.push(line)).await;
        assert_eq!(
            lines,
            vec![
                "[format-agent] tool: tool_0",
                "[format-agent] tool: tool_1",
                "[format-agent] tool: tool_2",
            ]
        );
    }

    #[tokio::test]
    async fn test_printer_survives_lag() {
        let bus = EventBus::new(2);
        let rx = bus.subscribe();
        for n in 0..5 {
            bus.publish(tool_start(n));
        }
        let done = CancellationToken::new();
        done.cancel();

        let mut lines = Vec::new();
        forward_tool_events(rx, done, |line| lines.push(line)).await;
        assert_eq!(
            lines,
            vec!["[format-agent] tool: tool_3", "[format-agent] tool: tool_4"]
        );
    }

    #[test]
    fn test_only_failed_tool_ends_are_printed() {
        let ok = AgentEvent::ToolEnd {
            agent_id: "format-agent".into(),
            name: "get_issue".into(),
            result: pmbuddy_core::types::ToolResult::success("{}"),
        };
        let failed = AgentEvent::ToolEnd {
            agent_id: "format-agent".into(),
            name: "get_issue".into(),
            result: pmbuddy_core::types::ToolResult::error("404"),
        };
        assert_eq!(tool_event_line(&ok), None);
        assert_eq!(
            tool_event_line(&failed).as_deref(),
            Some("[format-agent] get_issue failed: 404")
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("short", 200), "short");
    }
}
