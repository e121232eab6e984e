use rmcp::model::Tool as McpTool;

/// Name predicate applied to a server's tool list at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolFilter {
    /// Keep every tool.
    All,
    /// Keep tools whose name contains at least one of the substrings.
    NameContainsAny(Vec<String>),
}

impl ToolFilter {
    pub fn name_contains_any(needles: &[&str]) -> Self {
        ToolFilter::NameContainsAny(needles.iter().map(|s| s.to_string()).collect())
    }

    /// Case-sensitive substring match.
    pub fn allows(&self, name: &str) -> bool {
        match self {
            ToolFilter::All => true,
            ToolFilter::NameContainsAny(needles) => {
                needles.iter().any(|n| name.contains(n.as_str()))
            }
        }
    }
}

/// Anything with a tool name.
pub trait NamedTool {
    fn tool_name(&self) -> &str;
}

impl NamedTool for McpTool {
    fn tool_name(&self) -> &str {
        &self.name
    }
}

impl NamedTool for String {
    fn tool_name(&self) -> &str {
        self
    }
}

impl NamedTool for &str {
    fn tool_name(&self) -> &str {
        self
    }
}

/// Keep the tools `filter` allows, in their original order.
pub fn filter_tools<T: NamedTool>(tools: Vec<T>, filter: &ToolFilter) -> Vec<T> {
    tools
        .into_iter()
        .filter(|t| filter.allows(t.tool_name()))
        .collect()
}
