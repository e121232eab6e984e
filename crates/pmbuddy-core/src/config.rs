use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PmBuddyError, Result};

/// Top-level PM Buddy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// `azure` or `openai` (any OpenAI-compatible endpoint).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name for OpenAI, deployment name for Azure.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Azure AD bearer token, used when no `api_key` is set.
    #[serde(default)]
    pub ad_token: Option<String>,
    /// Fetch Entra ID tokens from the signed-in Azure CLI when neither
    /// `api_key` nor `ad_token` is set.
    #[serde(default)]
    pub azure_cli_credential: bool,
    /// Full chat-completions URL for OpenAI-compatible providers.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Azure resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    #[serde(default)]
    pub azure_endpoint: Option<String>,
    #[serde(default = "default_azure_api_version")]
    pub azure_api_version: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider() -> String { "azure".to_string() }
fn default_model_id() -> String { "gpt-4.1".to_string() }
fn default_azure_api_version() -> String { "2024-10-21".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for outbound model and agent calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_multiplier")]
    pub multiplier_ms: u64,
    #[serde(default = "default_min_backoff")]
    pub min_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            multiplier_ms: default_multiplier(),
            min_backoff_ms: default_min_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 { 3 }
fn default_multiplier() -> u64 { 1000 }
fn default_min_backoff() -> u64 { 4000 }
fn default_max_backoff() -> u64 { 10000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_parallel_tools")]
    pub parallel_tools: bool,
    /// Directory holding `<agent>.prompt` templates.
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: String,
    /// Retry policy applied around whole agent runs.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            parallel_tools: default_parallel_tools(),
            prompts_dir: default_prompts_dir(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_max_turns() -> usize { 20 }
fn default_parallel_tools() -> bool { true }
fn default_prompts_dir() -> String { "prompts".to_string() }

/// GitHub MCP server and credential configuration.
///
/// Fields ending in `_env` name environment variables, so secrets never
/// live in the config file itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_mcp_url")]
    pub mcp_url: String,
    /// Personal/Actions token, used by the investigate agent.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Installation token, used by the other agents.
    #[serde(default = "default_app_token_env")]
    pub app_token_env: String,
    #[serde(default = "default_app_id_env")]
    pub app_id_env: String,
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    #[serde(default = "default_installation_id_env")]
    pub installation_id_env: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Per-tool-call timeout in seconds.
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
    /// Run a local MCP server over stdio instead of `mcp_url`.
    #[serde(default)]
    pub mcp_command: Option<String>,
    #[serde(default)]
    pub mcp_args: Vec<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            mcp_url: default_mcp_url(),
            token_env: default_token_env(),
            app_token_env: default_app_token_env(),
            app_id_env: default_app_id_env(),
            private_key_env: default_private_key_env(),
            installation_id_env: default_installation_id_env(),
            api_url: default_api_url(),
            timeout_secs: default_mcp_timeout(),
            mcp_command: None,
            mcp_args: Vec::new(),
        }
    }
}

impl GitHubConfig {
    /// MCP server settings authenticated with `token`.
    ///
    /// The HTTP server gets a bearer header; a stdio server gets the token
    /// as `GITHUB_PERSONAL_ACCESS_TOKEN`.
    pub fn mcp_server(&self, token: &str) -> McpServerConfig {
        match &self.mcp_command {
            Some(command) => McpServerConfig {
                transport: McpTransport::Stdio {
                    command: command.clone(),
                    args: self.mcp_args.clone(),
                    env: HashMap::from([(
                        "GITHUB_PERSONAL_ACCESS_TOKEN".to_string(),
                        token.to_string(),
                    )]),
                },
                timeout_secs: self.timeout_secs,
                headers: HashMap::new(),
            },
            None => McpServerConfig {
                transport: McpTransport::Http {
                    url: self.mcp_url.clone(),
                },
                timeout_secs: self.timeout_secs,
                headers: HashMap::from([(
                    "Authorization".to_string(),
                    format!("Bearer {}", token),
                )]),
            },
        }
    }
}

/// Configuration for a single MCP server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub transport: McpTransport,
    /// Per-tool-call timeout in seconds.
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
    /// Extra HTTP headers sent on every request (HTTP transport only).
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// MCP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Streamable HTTP.
    Http { url: String },
}

fn default_mcp_url() -> String { "https://api.githubcopilot.com/mcp/".to_string() }
fn default_token_env() -> String { "GITHUB_TOKEN".to_string() }
fn default_app_token_env() -> String { "GITHUB_APP_TOKEN".to_string() }
fn default_app_id_env() -> String { "GITHUB_APP_ID".to_string() }
fn default_private_key_env() -> String { "GITHUB_APP_PRIVATE_KEY".to_string() }
fn default_installation_id_env() -> String { "GITHUB_APP_INSTALLATION_ID".to_string() }
fn default_api_url() -> String { "https://api.github.com".to_string() }
fn default_mcp_timeout() -> u64 { 120 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8093 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. Falls back to `OTEL_EXPORTER_OTLP_ENDPOINT`.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Record prompts and completions on spans.
    #[serde(default = "default_sensitive_data")]
    pub enable_sensitive_data: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: default_service_name(),
            enable_sensitive_data: default_sensitive_data(),
        }
    }
}

fn default_service_name() -> String { "pm-buddy".to_string() }
fn default_sensitive_data() -> bool { true }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Upper bound on supersteps before a run is failed.
    #[serde(default = "default_max_supersteps")]
    pub max_supersteps: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_supersteps: default_max_supersteps(),
        }
    }
}

fn default_max_supersteps() -> usize { 100 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| PmBuddyError::ConfigNotFound(path.display().to_string()))?;

        Self::from_toml_str(&content)
    }

    /// Parse TOML content after expanding `${ENV_VAR}` references.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| PmBuddyError::Config(e.to_string()))
    }

    /// Build a config purely from environment variables.
    ///
    /// Azure OpenAI is used when `AZURE_OPENAI_ENDPOINT` is set, otherwise
    /// the OpenAI API with `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] with an injectable variable lookup.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let model = if let Some(endpoint) = lookup("AZURE_OPENAI_ENDPOINT") {
            let api_key = lookup("AZURE_OPENAI_API_KEY").filter(|v| !v.trim().is_empty());
            let ad_token = lookup("AZURE_OPENAI_AD_TOKEN").filter(|v| !v.trim().is_empty());
            ModelConfig {
                provider: "azure".to_string(),
                model_id: lookup("AZURE_OPENAI_DEPLOYMENT_NAME").unwrap_or_else(default_model_id),
                // Without a key or token, sign in through the Azure CLI
                azure_cli_credential: api_key.is_none() && ad_token.is_none(),
                api_key,
                ad_token,
                base_url: None,
                azure_endpoint: Some(endpoint),
                azure_api_version: lookup("AZURE_OPENAI_API_VERSION")
                    .unwrap_or_else(default_azure_api_version),
                ..ModelConfig::default()
            }
        } else if let Some(key) = lookup("OPENAI_API_KEY") {
            ModelConfig {
                provider: "openai".to_string(),
                model_id: lookup("OPENAI_MODEL").unwrap_or_else(default_model_id),
                api_key: Some(key),
                base_url: lookup("OPENAI_BASE_URL"),
                ..ModelConfig::default()
            }
        } else {
            return Err(PmBuddyError::Config(
                "set AZURE_OPENAI_ENDPOINT or OPENAI_API_KEY, or provide a config file".into(),
            ));
        };

        Ok(Self {
            model,
            agent: AgentConfig::default(),
            github: GitHubConfig::default(),
            gateway: GatewayConfig::default(),
            telemetry: TelemetryConfig {
                otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT"),
                service_name: lookup("OTEL_SERVICE_NAME").unwrap_or_else(default_service_name),
                ..TelemetryConfig::default()
            },
            workflow: WorkflowConfig::default(),
        })
    }

    /// Resolve the prompts directory (expand ~).
    pub fn prompts_dir(&self) -> PathBuf {
        expand_home(&self.agent.prompts_dir)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            ad_token: None,
            azure_cli_credential: false,
            base_url: None,
            azure_endpoint: None,
            azure_api_version: default_azure_api_version(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            extra_headers: HashMap::new(),
            retry: RetryConfig::default(),
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
