use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A simple representation of a GitHub issue.
///
/// The format agent emits this as JSON; branch conditions parse it back to
/// decide routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GitHubIssue {
    /// `owner/name` of the repository.
    pub repository: String,
    pub issue_number: u64,
    pub title: String,
    pub body: String,
    /// Label names in the order GitHub returned them.
    pub labels: Vec<String>,
}

impl GitHubIssue {
    /// Parse the JSON payload produced by the format agent.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Exact, case-sensitive label membership.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}
