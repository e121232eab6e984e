use std::fmt;

use pmbuddy_core::issue::GitHubIssue;
use pmbuddy_core::types::ResponseFormat;
use pmbuddy_mcp::ToolFilter;

/// Which GitHub token an agent's MCP connection authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScope {
    /// GitHub App installation token.
    App,
    /// User or Actions token.
    User,
}

/// The four triage agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    Format,
    Investigate,
    Refine,
    RootCause,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Format,
        AgentKind::Investigate,
        AgentKind::Refine,
        AgentKind::RootCause,
    ];

    /// Executor id, also used as the agent name and MCP connection name.
    pub fn id(self) -> &'static str {
        match self {
            AgentKind::Format => "format-agent",
            AgentKind::Investigate => "investigate-agent",
            AgentKind::Refine => "refine-agent",
            AgentKind::RootCause => "root-cause-agent",
        }
    }

    /// Prompt template name, without the `.prompt` extension.
    pub fn prompt_name(self) -> &'static str {
        match self {
            AgentKind::Format => "format_agent",
            AgentKind::Investigate => "investigate_agent",
            AgentKind::Refine => "refine_agent",
            AgentKind::RootCause => "root_cause_analysis_agent",
        }
    }

    pub fn tool_filter(self) -> ToolFilter {
        match self {
            AgentKind::Format | AgentKind::Refine => ToolFilter::name_contains_any(&["issue"]),
            AgentKind::Investigate | AgentKind::RootCause => {
                ToolFilter::name_contains_any(&["issue", "search", "file"])
            }
        }
    }

    pub fn token_scope(self) -> TokenScope {
        match self {
            AgentKind::Investigate => TokenScope::User,
            _ => TokenScope::App,
        }
    }

    /// Only the format agent is constrained to structured output.
    pub fn response_format(self) -> Option<ResponseFormat> {
        match self {
            AgentKind::Format => Some(ResponseFormat::for_type::<GitHubIssue>("GitHubIssue")),
            _ => None,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}
