//! Resource kinds that may appear in a property path.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed set of resource kinds a dashboard reference can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Benchmark grouping controls
    Benchmark,
    /// Card leaf node
    Card,
    /// Node/edge category
    Category,
    /// Chart leaf node
    Chart,
    /// Layout container
    Container,
    /// Control
    Control,
    /// Top level dashboard
    Dashboard,
    /// Graph edge
    Edge,
    /// Flow leaf node
    Flow,
    /// Graph leaf node
    Graph,
    /// Hierarchy leaf node
    Hierarchy,
    /// Image leaf node
    Image,
    /// User supplied input
    Input,
    /// Local value
    Local,
    /// Mod
    Mod,
    /// Graph node
    Node,
    /// Parameter of a query provider
    Param,
    /// Named query
    Query,
    /// Table leaf node
    Table,
    /// Text leaf node
    Text,
    /// Variable
    Variable,
    /// Named sub-query whose rows other nodes may reference
    With,
}

impl ResourceKind {
    /// Every recognized kind.
    pub const ALL: [ResourceKind; 22] = [
        Self::Benchmark,
        Self::Card,
        Self::Category,
        Self::Chart,
        Self::Container,
        Self::Control,
        Self::Dashboard,
        Self::Edge,
        Self::Flow,
        Self::Graph,
        Self::Hierarchy,
        Self::Image,
        Self::Input,
        Self::Local,
        Self::Mod,
        Self::Node,
        Self::Param,
        Self::Query,
        Self::Table,
        Self::Text,
        Self::Variable,
        Self::With,
    ];

    /// The keyword used for this kind in references.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Benchmark => "benchmark",
            Self::Card => "card",
            Self::Category => "category",
            Self::Chart => "chart",
            Self::Container => "container",
            Self::Control => "control",
            Self::Dashboard => "dashboard",
            Self::Edge => "edge",
            Self::Flow => "flow",
            Self::Graph => "graph",
            Self::Hierarchy => "hierarchy",
            Self::Image => "image",
            Self::Input => "input",
            Self::Local => "local",
            Self::Mod => "mod",
            Self::Node => "node",
            Self::Param => "param",
            Self::Query => "query",
            Self::Table => "table",
            Self::Text => "text",
            Self::Variable => "variable",
            Self::With => "with",
        }
    }

    /// Look up a kind by its keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == keyword)
    }

    /// Whether this kind only groups other nodes.
    ///
    /// Container nodes never own producible values, so the upward publisher
    /// walk passes straight through them.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container | Self::Benchmark)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_keyword(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_unknown_keyword() {
        assert_eq!(ResourceKind::from_keyword("widget"), None);
        assert_eq!(ResourceKind::from_keyword("With"), None);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&ResourceKind::With).unwrap();
        assert_eq!(json, "\"with\"");
    }
}
