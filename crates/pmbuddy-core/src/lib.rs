pub mod config;
pub mod error;
pub mod event;
pub mod issue;
pub mod retry;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{PmBuddyError, Result};
pub use event::EventBus;
pub use issue::GitHubIssue;
pub use retry::RetryPolicy;
pub use types::*;
