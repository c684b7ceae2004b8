use std::sync::Arc;

use serde_json::{json, Map, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mesh_gateway::auth::delegation::DelegationSigner;
use mesh_gateway::config::{
    Connection, ConnectionType, DelegationConfig, EntityStatus, SelectionMode, StrategyKind,
    VirtualMcp, VirtualMcpMember,
};
use mesh_gateway::context::{CallerIdentity, RequestContext, UserRole};
use mesh_gateway::monitor::event::MemoryAuditSink;
use mesh_gateway::monitor::tracer::RecordingTracer;
use mesh_gateway::store;

pub fn admin_identity() -> CallerIdentity {
    CallerIdentity::UserSession {
        user_id: "admin-user".into(),
        role: UserRole::Admin,
    }
}

pub fn signer() -> Arc<DelegationSigner> {
    Arc::new(DelegationSigner::new(&DelegationConfig {
        secret: "integration-secret".into(),
        ttl_secs: 120,
    }))
}

pub struct TestSession {
    pub ctx: Arc<RequestContext>,
    pub tracer: Arc<RecordingTracer>,
    pub audit: Arc<MemoryAuditSink>,
}

pub fn session(org: &str, identity: CallerIdentity) -> TestSession {
    let tracer = RecordingTracer::new();
    let audit = MemoryAuditSink::new();
    let ctx = Arc::new(
        RequestContext::new(Some(org.to_string()), identity)
            .with_tracer(tracer.clone())
            .with_audit(audit.clone())
            .with_base_url("http://gateway.test"),
    );
    TestSession { ctx, tracer, audit }
}

pub fn connection(id: &str, org: &str, title: &str, url: &str) -> Arc<Connection> {
    Arc::new(Connection {
        id: id.into(),
        organization_id: org.into(),
        title: title.into(),
        connection_type: ConnectionType::HttpStreamable,
        url: url.into(),
        connection_token: None,
        connection_headers: None,
        configuration_state: Map::new(),
        configuration_scopes: Vec::new(),
        tool_index: None,
        capabilities: None,
        virtual_mcp_id: None,
        status: EntityStatus::Active,
    })
}

/// Registers the connection in the global store so assembly can resolve
/// it. Tests namespace ids by tenant to stay independent.
pub fn register(connection: &Arc<Connection>) {
    store::CONNECTION_MAP.insert(connection.id.clone(), connection.clone());
}

pub fn member(connection_id: &str) -> VirtualMcpMember {
    VirtualMcpMember {
        connection_id: connection_id.into(),
        selected_tools: None,
        selected_resources: None,
        selected_prompts: None,
    }
}

pub fn entity(org: &str, mode: SelectionMode, members: Vec<VirtualMcpMember>) -> Arc<VirtualMcp> {
    Arc::new(VirtualMcp {
        id: format!("vmcp-{org}"),
        organization_id: org.into(),
        title: format!("Virtual {org}"),
        instructions: None,
        status: EntityStatus::Active,
        tool_selection_mode: mode,
        tool_selection_strategy: StrategyKind::Passthrough,
        members,
    })
}

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": result,
    }))
}

pub fn tool(name: &str) -> Value {
    json!({
        "name": name,
        "description": format!("{name} tool"),
        "inputSchema": {"type": "object", "properties": {}},
    })
}

/// Mounts a `tools/list` answer on the mock upstream.
pub async fn mock_tools_list(server: &MockServer, tools: Vec<Value>) {
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(rpc_result(json!({ "tools": tools })))
        .mount(server)
        .await;
}

/// Mounts a `tools/call` answer for one tool name.
pub async fn mock_tool_call(server: &MockServer, tool_name: &str, result: Value) {
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(
            json!({"method": "tools/call", "params": {"name": tool_name}}),
        ))
        .respond_with(rpc_result(result))
        .mount(server)
        .await;
}

pub async fn mock_rpc_method(server: &MockServer, rpc_method: &str, result: Value) {
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(json!({"method": rpc_method})))
        .respond_with(rpc_result(result))
        .mount(server)
        .await;
}
