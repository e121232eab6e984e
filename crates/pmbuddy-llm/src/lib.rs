pub mod providers;
pub mod retry;
pub mod streaming;

use pmbuddy_core::config::ModelConfig;
use pmbuddy_core::error::{PmBuddyError, Result};
use pmbuddy_core::traits::LlmClient;

pub use providers::azure::AzureClient;
pub use providers::azure_cli::AzureCliCredential;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "azure" | "azure_openai" => Ok(Box::new(AzureClient::from_config(config)?)),
        "openai" | "openai_compatible" => Ok(Box::new(OpenAiClient::new())),
        other => Err(PmBuddyError::UnsupportedProvider(other.to_string())),
    }
}

/// Create the configured client wrapped in the retry policy from `config.retry`.
pub fn create_retrying_client(config: &ModelConfig) -> Result<RetryingClient> {
    let inner = create_client(config)?;
    Ok(RetryingClient::new(inner, config.retry.clone()))
}

/// [`create_retrying_client`], then resolve credentials once so a missing
/// login fails at startup.
pub async fn create_verified_client(config: &ModelConfig) -> Result<RetryingClient> {
    let client = create_retrying_client(config)?;
    client.verify().await?;
    Ok(client)
}
