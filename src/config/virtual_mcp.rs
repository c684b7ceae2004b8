use serde::{Deserialize, Serialize};
use validator::Validate;

use super::connection::EntityStatus;

/// Reserved id prefix for the per-tenant default agent: a virtual MCP that
/// behaves as exclusion mode over all active connections with no
/// exclusions.
pub const DEFAULT_AGENT_PREFIX: &str = "decopilot-";

/// How member selection lists are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Load exactly the listed members; per-member lists are whitelists.
    #[default]
    Inclusion,
    /// Start from all active connections in the tenant; per-member lists
    /// subtract.
    Exclusion,
}

/// Tool-presentation strategy. Unknown mode strings fall back to
/// passthrough so query-string experimentation cannot break an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Passthrough,
    Smart,
}

impl StrategyKind {
    pub fn from_mode(mode: Option<&str>) -> Self {
        match mode {
            Some("smart") => StrategyKind::Smart,
            _ => StrategyKind::Passthrough,
        }
    }
}

/// One member entry of a virtual MCP. `None` selection means "all"; in
/// exclusion mode an entry whose three lists are all empty or absent drops
/// the connection entirely.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VirtualMcpMember {
    #[validate(length(min = 1))]
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_resources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_prompts: Option<Vec<String>>,
}

impl VirtualMcpMember {
    /// True when every selection facet is empty or absent.
    pub fn is_empty_selection(&self) -> bool {
        fn empty(list: &Option<Vec<String>>) -> bool {
            list.as_ref().map_or(true, |l| l.is_empty())
        }
        empty(&self.selected_tools)
            && empty(&self.selected_resources)
            && empty(&self.selected_prompts)
    }
}

/// A tenant-defined composition of connections exposing one aggregated MCP
/// surface.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VirtualMcp {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(length(min = 1))]
    pub organization_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub status: EntityStatus,
    #[serde(default)]
    pub tool_selection_mode: SelectionMode,
    #[serde(default)]
    pub tool_selection_strategy: StrategyKind,
    #[serde(default)]
    #[validate(nested)]
    pub members: Vec<VirtualMcpMember>,
}

impl VirtualMcp {
    /// The well-known default agent for a tenant: exclusion over everything
    /// active, no exclusions, no instructions.
    pub fn default_agent(organization_id: &str) -> Self {
        Self {
            id: format!("{DEFAULT_AGENT_PREFIX}{organization_id}"),
            organization_id: organization_id.to_string(),
            title: "Default agent".to_string(),
            instructions: None,
            status: EntityStatus::Active,
            tool_selection_mode: SelectionMode::Exclusion,
            tool_selection_strategy: StrategyKind::Passthrough,
            members: Vec::new(),
        }
    }

    pub fn is_default_agent(id: &str) -> bool {
        id.starts_with(DEFAULT_AGENT_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mode_falls_back_to_passthrough() {
        assert_eq!(StrategyKind::from_mode(Some("smart")), StrategyKind::Smart);
        assert_eq!(
            StrategyKind::from_mode(Some("experimental-42")),
            StrategyKind::Passthrough
        );
        assert_eq!(StrategyKind::from_mode(None), StrategyKind::Passthrough);
    }

    #[test]
    fn empty_selection_detects_null_and_empty_lists() {
        let member = VirtualMcpMember {
            connection_id: "c2".into(),
            selected_tools: None,
            selected_resources: Some(vec![]),
            selected_prompts: None,
        };
        assert!(member.is_empty_selection());

        let member = VirtualMcpMember {
            connection_id: "c2".into(),
            selected_tools: Some(vec!["t1".into()]),
            selected_resources: None,
            selected_prompts: None,
        };
        assert!(!member.is_empty_selection());
    }

    #[test]
    fn default_agent_is_exclusion_over_everything() {
        let agent = VirtualMcp::default_agent("org1");
        assert!(VirtualMcp::is_default_agent(&agent.id));
        assert_eq!(agent.tool_selection_mode, SelectionMode::Exclusion);
        assert!(agent.members.is_empty());
        assert!(agent.status.is_active());
    }
}
