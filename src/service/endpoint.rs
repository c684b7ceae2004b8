use matchit::Router;
use once_cell::sync::Lazy;

/// Header carrying the tenant id.
pub const ORG_ID_HEADER: &str = "x-org-id";
/// Header carrying the tenant slug; `x-org-id` wins when both are set.
pub const ORG_SLUG_HEADER: &str = "x-org-slug";
/// Header alternative to the virtual MCP URL parameter.
pub const VIRTUAL_MCP_ID_HEADER: &str = "x-virtual-mcp-id";
/// Caller connection id, propagated onward to upstreams.
pub const CALLER_ID_HEADER: &str = "x-caller-id";
/// Caller identity headers, filled in by the authentication layer in
/// front of this gateway.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const API_KEY_USER_HEADER: &str = "x-api-key-user";

/// What a front-door path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// `/mcp/:connection_id`: one upstream behind auth + monitoring.
    Connection,
    /// `/mcp/virtual-mcp/:id?` and the backward-compatible
    /// `/mcp/gateway/:id?`: the aggregated surface.
    VirtualMcp,
    /// Virtual MCP with the id taken from headers or the tenant default.
    VirtualMcpDefault,
    /// `/mcp/mesh/:org_slug`: all active connections of a tenant,
    /// collision-prefixed tool names.
    Mesh,
    /// `/mcp/:connection_id/call-tool/:tool_name`: raw streaming call.
    ConnectionStream,
    /// `/mcp/virtual-mcp/:id/call-tool/:tool_name`.
    VirtualMcpStream,
    /// Legacy SSE stream (2024-11-05).
    Sse,
    /// Legacy message endpoint paired with the SSE stream.
    Message,
}

static ROUTES: Lazy<Router<EndpointKind>> = Lazy::new(|| {
    let mut router = Router::new();
    router
        .insert("/mcp/virtual-mcp", EndpointKind::VirtualMcpDefault)
        .expect("route table");
    router
        .insert("/mcp/virtual-mcp/{id}", EndpointKind::VirtualMcp)
        .expect("route table");
    router
        .insert(
            "/mcp/virtual-mcp/{id}/call-tool/{tool_name}",
            EndpointKind::VirtualMcpStream,
        )
        .expect("route table");
    router
        .insert("/mcp/gateway", EndpointKind::VirtualMcpDefault)
        .expect("route table");
    router
        .insert("/mcp/gateway/{id}", EndpointKind::VirtualMcp)
        .expect("route table");
    router
        .insert(
            "/mcp/gateway/{id}/call-tool/{tool_name}",
            EndpointKind::VirtualMcpStream,
        )
        .expect("route table");
    router
        .insert("/mcp/mesh/{org_slug}", EndpointKind::Mesh)
        .expect("route table");
    router
        .insert("/mcp/{connection_id}", EndpointKind::Connection)
        .expect("route table");
    router
        .insert(
            "/mcp/{connection_id}/call-tool/{tool_name}",
            EndpointKind::ConnectionStream,
        )
        .expect("route table");
    router
        .insert(crate::config::CLIENT_SSE_ENDPOINT, EndpointKind::Sse)
        .expect("route table");
    router
        .insert(crate::config::CLIENT_MESSAGE_ENDPOINT, EndpointKind::Message)
        .expect("route table");
    router
});

/// A matched endpoint with its path parameters.
pub struct MatchedEndpoint {
    pub kind: EndpointKind,
    pub id: Option<String>,
    pub org_slug: Option<String>,
    pub connection_id: Option<String>,
    pub tool_name: Option<String>,
}

pub fn match_endpoint(path: &str) -> Option<MatchedEndpoint> {
    let matched = ROUTES.at(path).ok()?;
    let get = |key: &str| matched.params.get(key).map(String::from);
    Some(MatchedEndpoint {
        kind: *matched.value,
        id: get("id"),
        org_slug: get("org_slug"),
        connection_id: get("connection_id"),
        tool_name: get("tool_name"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_segments_win_over_connection_param() {
        let m = match_endpoint("/mcp/virtual-mcp/v1").unwrap();
        assert_eq!(m.kind, EndpointKind::VirtualMcp);
        assert_eq!(m.id.as_deref(), Some("v1"));

        let m = match_endpoint("/mcp/c1").unwrap();
        assert_eq!(m.kind, EndpointKind::Connection);
        assert_eq!(m.connection_id.as_deref(), Some("c1"));
    }

    #[test]
    fn gateway_alias_matches_virtual_mcp() {
        let m = match_endpoint("/mcp/gateway/v1").unwrap();
        assert_eq!(m.kind, EndpointKind::VirtualMcp);
        let m = match_endpoint("/mcp/gateway").unwrap();
        assert_eq!(m.kind, EndpointKind::VirtualMcpDefault);
    }

    #[test]
    fn mesh_and_stream_routes_match() {
        let m = match_endpoint("/mcp/mesh/acme").unwrap();
        assert_eq!(m.kind, EndpointKind::Mesh);
        assert_eq!(m.org_slug.as_deref(), Some("acme"));

        let m = match_endpoint("/mcp/c1/call-tool/search").unwrap();
        assert_eq!(m.kind, EndpointKind::ConnectionStream);
        assert_eq!(m.tool_name.as_deref(), Some("search"));
    }

    #[test]
    fn unknown_paths_do_not_match() {
        assert!(match_endpoint("/nope").is_none());
        assert!(match_endpoint("/mcp").is_none());
    }
}
