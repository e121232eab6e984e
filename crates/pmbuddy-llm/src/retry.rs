use futures::future::BoxFuture;
use futures::stream::BoxStream;

use pmbuddy_core::config::{ModelConfig, RetryConfig};
use pmbuddy_core::error::{PmBuddyError, Result};
use pmbuddy_core::retry::RetryPolicy;
use pmbuddy_core::traits::LlmClient;
use pmbuddy_core::types::*;

/// An LLM client that retries transient failures when opening a stream.
///
/// Only 429, 5xx and transport failures are retried. Once the attempts are
/// exhausted the last error is returned as-is.
pub struct RetryingClient {
    inner: Box<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn LlmClient>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            policy: RetryPolicy::from_config(&retry_config),
        }
    }
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        response_format: Option<&ResponseFormat>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();
        let response_format = response_format.cloned();

        Box::pin(async move {
            self.policy
                .run("chat completion", PmBuddyError::is_transient, || {
                    self.inner.chat_stream(
                        &config,
                        messages.clone(),
                        &tools,
                        response_format.as_ref(),
                    )
                })
                .await
        })
    }

    fn verify(&self) -> BoxFuture<'_, Result<()>> {
        self.inner.verify()
    }
}
