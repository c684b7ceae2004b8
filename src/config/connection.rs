use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use validator::Validate;

use crate::types::Tool;

/// Entity lifecycle state shared by connections and virtual MCPs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    #[default]
    Active,
    Inactive,
}

impl EntityStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, EntityStatus::Active)
    }
}

/// Wire transport used to reach the upstream server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Streamable HTTP MCP (JSON-RPC over POST, optional SSE framing).
    #[default]
    HttpStreamable,
    /// A connection that points back at a virtual MCP served by this
    /// gateway. Carried so exclusion-mode assembly can skip self cycles.
    Virtual,
}

/// A registered upstream MCP server belonging to a tenant.
///
/// Records are created and updated outside the core; within one request a
/// connection is immutable.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Connection {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(length(min = 1))]
    pub organization_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "type")]
    pub connection_type: ConnectionType,
    /// Base URL of the upstream MCP endpoint.
    #[validate(length(min = 1))]
    pub url: String,
    /// Static bearer sent as `Authorization: Bearer …` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_token: Option<String>,
    /// Extra headers merged last into every upstream request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_headers: Option<HashMap<String, String>>,
    /// Opaque per-connection state map.
    #[serde(default)]
    pub configuration_state: Map<String, Value>,
    /// `"KEY::SCOPE"` entries naming which state keys carry scoped grants.
    #[serde(default)]
    pub configuration_scopes: Vec<String>,
    /// Cached tool index; when present, `tools/list` is answered without
    /// contacting the upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_index: Option<Vec<Tool>>,
    /// Capabilities the upstream advertised at registration time. Facets the
    /// upstream does not advertise are listed as empty without a network
    /// call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<crate::types::ServerCapabilities>,
    /// For [`ConnectionType::Virtual`], the virtual MCP this connection
    /// resolves to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_mcp_id: Option<String>,
    #[serde(default)]
    pub status: EntityStatus,
}

impl Connection {
    /// Scoped permission pairs derived from `configuration_state` and
    /// `configuration_scopes`: for every `"KEY::SCOPE"` entry whose state
    /// value is a string, the value maps to all scopes declared for that
    /// key.
    pub fn derived_permissions(&self) -> Map<String, Value> {
        let mut scopes_by_key: HashMap<&str, Vec<&str>> = HashMap::new();
        for entry in &self.configuration_scopes {
            if let Some((key, scope)) = entry.split_once("::") {
                scopes_by_key.entry(key).or_default().push(scope);
            }
        }

        let mut permissions = Map::new();
        for (key, scopes) in scopes_by_key {
            if let Some(Value::String(target)) = self.configuration_state.get(key) {
                let list: Vec<Value> = scopes
                    .iter()
                    .map(|scope| Value::String((*scope).to_string()))
                    .collect();
                match permissions.get_mut(target) {
                    Some(Value::Array(existing)) => existing.extend(list),
                    _ => {
                        permissions.insert(target.clone(), Value::Array(list));
                    }
                }
            }
        }
        permissions
    }
}
