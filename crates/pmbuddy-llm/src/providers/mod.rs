pub mod azure;
pub mod azure_cli;
pub mod openai;

pub use azure::AzureClient;
pub use azure_cli::AzureCliCredential;
pub use openai::OpenAiClient;
