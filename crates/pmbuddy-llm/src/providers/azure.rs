use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use reqwest::Client;

use pmbuddy_core::config::ModelConfig;
use pmbuddy_core::error::{PmBuddyError, Result};
use pmbuddy_core::traits::LlmClient;
use pmbuddy_core::types::*;

use super::azure_cli::AzureCliCredential;
use super::openai::{build_request, send_streaming};

/// Azure OpenAI client. Same wire format as OpenAI, but the deployment is
/// addressed in the URL and auth is `api-key`, a static Entra ID token, or a
/// token from the Azure CLI, in that order.
pub struct AzureClient {
    http: Client,
    cli: Option<Arc<AzureCliCredential>>,
}

impl AzureClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            cli: None,
        }
    }

    /// Build a client for `config`, failing when no credential source is set.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        deployment_url(config)?;
        let client = Self::new();
        if has_static_credential(config) {
            return Ok(client);
        }
        if config.azure_cli_credential {
            return Ok(client.with_cli_credential(Arc::new(AzureCliCredential::new())));
        }
        Err(PmBuddyError::Config(
            "Azure: set api_key, ad_token, or azure_cli_credential = true".into(),
        ))
    }

    pub fn with_cli_credential(mut self, credential: Arc<AzureCliCredential>) -> Self {
        self.cli = Some(credential);
        self
    }
}

impl Default for AzureClient {
    fn default() -> Self {
        Self::new()
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn has_static_credential(config: &ModelConfig) -> bool {
    non_blank(&config.api_key).is_some() || non_blank(&config.ad_token).is_some()
}

/// `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=..`
pub(crate) fn deployment_url(config: &ModelConfig) -> Result<String> {
    let endpoint = config
        .azure_endpoint
        .as_deref()
        .or(config.base_url.as_deref())
        .ok_or_else(|| PmBuddyError::Config("Azure: azure_endpoint is required".into()))?;

    Ok(format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        endpoint.trim_end_matches('/'),
        config.model_id,
        config.azure_api_version
    ))
}

impl LlmClient for AzureClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        response_format: Option<&ResponseFormat>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        // The deployment in the URL selects the model
        let body = build_request(&config, None, messages, tools, response_format);

        Box::pin(async move {
            let url = deployment_url(&config)?;
            let mut req = self.http.post(&url).json(&body);

            req = match (non_blank(&config.api_key), non_blank(&config.ad_token), &self.cli) {
                (Some(key), _, _) => req.header("api-key", key),
                (None, Some(token), _) => req.header("Authorization", format!("Bearer {}", token)),
                (None, None, Some(cli)) => {
                    req.header("Authorization", format!("Bearer {}", cli.token().await?))
                }
                (None, None, None) => {
                    return Err(PmBuddyError::Config(
                        "Azure: api_key or ad_token is required".into(),
                    ))
                }
            };
            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            send_streaming(req).await
        })
    }

    fn verify(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match &self.cli {
                Some(cli) => cli.token().await.map(|_| ()),
                None => Ok(()),
            }
        })
    }
}
