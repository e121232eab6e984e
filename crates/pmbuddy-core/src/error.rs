use thiserror::Error;

#[derive(Debug, Error)]
pub enum PmBuddyError {
    // LLM / service errors
    /// The remote service answered with an error, or could not be reached
    /// (`status` is `None` for transport failures).
    #[error("Service response error{}: {message}", fmt_status(.status))]
    ServiceResponse { status: Option<u16>, message: String },

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    // Agent errors
    #[error("Agent exceeded max turns ({0})")]
    MaxTurnsExceeded(usize),

    #[error("Agent cancelled")]
    Cancelled,

    #[error("Prompt template not found: {0}")]
    PromptNotFound(String),

    // Workflow errors
    #[error("Workflow error: {0}")]
    Workflow(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // GitHub errors
    #[error("GitHub auth error: {0}")]
    GitHubAuth(String),

    // MCP errors
    #[error("MCP error: {0}")]
    Mcp(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PmBuddyError {
    /// Rate limits, server-side failures, and transport failures.
    ///
    /// Only these are retried; client errors (4xx other than 429) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            PmBuddyError::ServiceResponse { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            _ => false,
        }
    }

    /// Shorthand for a transport failure with no HTTP status.
    pub fn transport(message: impl Into<String>) -> Self {
        PmBuddyError::ServiceResponse {
            status: None,
            message: message.into(),
        }
    }
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, PmBuddyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let rate_limited = PmBuddyError::ServiceResponse {
            status: Some(429),
            message: "slow down".into(),
        };
        let unavailable = PmBuddyError::ServiceResponse {
            status: Some(503),
            message: "unavailable".into(),
        };
        let bad_request = PmBuddyError::ServiceResponse {
            status: Some(400),
            message: "bad".into(),
        };

        assert!(rate_limited.is_transient());
        assert!(unavailable.is_transient());
        assert!(PmBuddyError::transport("connection reset").is_transient());
        assert!(!bad_request.is_transient());
        assert!(!PmBuddyError::Config("missing".into()).is_transient());
    }

    #[test]
    fn test_service_response_display() {
        let e = PmBuddyError::ServiceResponse {
            status: Some(429),
            message: "Too Many Requests".into(),
        };
        assert_eq!(
            e.to_string(),
            "Service response error (HTTP 429): Too Many Requests"
        );
        assert_eq!(
            PmBuddyError::transport("timed out").to_string(),
            "Service response error: timed out"
        );
    }
}
