use std::sync::Arc;

use serde_json::{json, Value};

use crate::{
    auth::{delegation::DelegationSigner, permission::PermissionEvaluator},
    config::{
        Config, StrategyKind, VirtualMcp, VirtualMcpMember, SERVER_NAME, SERVER_VERSION,
    },
    context::{CallerIdentity, RequestContext},
    errors::GatewayError,
    jsonrpc::{JSONRPCError, JSONRPCRequest, JSONRPCResponse, INVALID_PARAMS, METHOD_NOT_FOUND},
    monitor::event::AuditSink,
    monitor::tracer::Tracer,
    store,
    types::{
        CallToolRequestParam, GetPromptRequestParam, Implementation, InitializeResult,
        ReadResourceRequestParam, RequestId,
    },
    vmcp::strategy::{strategy_for, ToolStrategy},
    vmcp::VirtualMcpServer,
};

/// Session parameters the front door extracted from headers and the
/// query string.
#[derive(Debug, Default)]
pub struct SessionParams {
    pub org_id: Option<String>,
    pub org_slug: Option<String>,
    pub virtual_mcp_id: Option<String>,
    pub identity: Option<CallerIdentity>,
    pub caller_connection_id: Option<String>,
    pub mode: Option<String>,
}

/// Outcome of one dispatched MCP request.
pub enum DispatchOutcome {
    Response(JSONRPCResponse),
    /// A protocol-level failure, reported as a JSON-RPC error frame.
    Error(JSONRPCError),
    /// Notifications are accepted and ignored.
    Accepted,
}

/// Per-session orchestration: resolves tenant and entity, builds the
/// request context, assembles the virtual MCP as a scoped resource, and
/// forwards MCP requests to it.
pub struct GatewayHandler {
    signer: Arc<DelegationSigner>,
    permissions: Arc<dyn PermissionEvaluator>,
    tracer: Arc<dyn Tracer>,
    audit: Arc<dyn AuditSink>,
    base_url: String,
}

impl GatewayHandler {
    pub fn new(
        signer: Arc<DelegationSigner>,
        permissions: Arc<dyn PermissionEvaluator>,
        tracer: Arc<dyn Tracer>,
        audit: Arc<dyn AuditSink>,
        base_url: String,
    ) -> Self {
        Self {
            signer,
            permissions,
            tracer,
            audit,
            base_url,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        use crate::auth::StaticPermissionEvaluator;
        use crate::monitor::event::LogAuditSink;
        use crate::monitor::tracer::LogTracer;

        Self::new(
            Arc::new(DelegationSigner::new(&config.gateway.delegation)),
            StaticPermissionEvaluator::from_grants(&config.permissions),
            Arc::new(LogTracer),
            Arc::new(LogAuditSink),
            config.gateway.base_url.clone(),
        )
    }

    /// Tenant id for this session: `x-org-id` wins, else the slug is
    /// looked up. A slug that resolves to nothing is not-found.
    pub fn resolve_tenant(&self, params: &SessionParams) -> Result<Option<String>, GatewayError> {
        if let Some(id) = &params.org_id {
            return Ok(Some(id.clone()));
        }
        if let Some(slug) = &params.org_slug {
            let tenant = store::tenant_fetch_by_slug(slug).ok_or(GatewayError::TenantNotFound)?;
            return Ok(Some(tenant.id.clone()));
        }
        Ok(None)
    }

    /// Builds the shared request context for a session bound to a
    /// tenant.
    pub fn session_context(
        &self,
        organization_id: Option<String>,
        params: &SessionParams,
    ) -> Arc<RequestContext> {
        let identity = params.identity.clone().unwrap_or(CallerIdentity::Anonymous);
        Arc::new(
            RequestContext::new(organization_id, identity)
                .with_permissions(self.permissions.clone())
                .with_tracer(self.tracer.clone())
                .with_audit(self.audit.clone())
                .with_base_url(self.base_url.clone())
                .with_caller_connection(params.caller_connection_id.clone()),
        )
    }

    /// Resolves the virtual MCP entity for a session: by id when given,
    /// otherwise the tenant's well-known default agent. Validates
    /// existence, tenant and status in that order.
    pub fn resolve_virtual_entity(
        &self,
        id: Option<&str>,
        organization_id: Option<&str>,
    ) -> Result<Arc<VirtualMcp>, GatewayError> {
        match id {
            Some(id) => match store::virtual_mcp_fetch(id) {
                Some(entity) => {
                    if let Some(org) = organization_id {
                        if entity.organization_id != org {
                            return Err(GatewayError::VirtualMcpNotFound);
                        }
                    }
                    if !entity.status.is_active() {
                        return Err(GatewayError::VirtualMcpInactive);
                    }
                    Ok(entity)
                }
                None if VirtualMcp::is_default_agent(id) => {
                    let owner = id
                        .strip_prefix(crate::config::DEFAULT_AGENT_PREFIX)
                        .unwrap_or_default();
                    if owner.is_empty() {
                        return Err(GatewayError::VirtualMcpNotFound);
                    }
                    if let Some(org) = organization_id {
                        if owner != org {
                            return Err(GatewayError::VirtualMcpNotFound);
                        }
                    }
                    Ok(Arc::new(VirtualMcp::default_agent(owner)))
                }
                None => Err(GatewayError::VirtualMcpNotFound),
            },
            None => {
                let org = organization_id.ok_or(GatewayError::VirtualMcpNotFound)?;
                Ok(Arc::new(VirtualMcp::default_agent(org)))
            }
        }
    }

    /// A one-connection entity for the direct `/mcp/:connection_id`
    /// surface; tenant and status were validated by the store lookup.
    pub fn direct_entity(
        &self,
        connection_id: &str,
        organization_id: Option<&str>,
    ) -> Result<Arc<VirtualMcp>, GatewayError> {
        let connection = store::resolve_connection(connection_id, organization_id)?;
        Ok(Arc::new(VirtualMcp {
            id: format!("direct-{}", connection.id),
            organization_id: connection.organization_id.clone(),
            title: connection.title.clone(),
            instructions: None,
            status: crate::config::EntityStatus::Active,
            tool_selection_mode: crate::config::SelectionMode::Inclusion,
            tool_selection_strategy: StrategyKind::Passthrough,
            members: vec![VirtualMcpMember {
                connection_id: connection.id.clone(),
                selected_tools: None,
                selected_resources: None,
                selected_prompts: None,
            }],
        }))
    }

    /// Query-string mode wins over the entity's configured strategy;
    /// unknown modes fall back to passthrough.
    pub fn session_strategy(
        &self,
        mode: Option<&str>,
        entity: &VirtualMcp,
    ) -> Arc<dyn ToolStrategy> {
        match mode {
            Some(mode) => strategy_for(StrategyKind::from_mode(Some(mode))),
            None => strategy_for(entity.tool_selection_strategy),
        }
    }

    pub fn signer(&self) -> &Arc<DelegationSigner> {
        &self.signer
    }

    /// Assembles the virtual MCP for one session.
    pub fn build_virtual(
        &self,
        entity: Arc<VirtualMcp>,
        ctx: &Arc<RequestContext>,
        strategy: Arc<dyn ToolStrategy>,
    ) -> VirtualMcpServer {
        VirtualMcpServer::assemble(entity, ctx, &self.signer, strategy)
    }

    pub fn build_mesh(
        &self,
        organization_id: &str,
        ctx: &Arc<RequestContext>,
        strategy: Arc<dyn ToolStrategy>,
    ) -> VirtualMcpServer {
        VirtualMcpServer::assemble_mesh(organization_id, ctx, &self.signer, strategy)
    }

    /// Forwards one MCP request to the assembled surface.
    pub async fn dispatch(
        &self,
        server: &VirtualMcpServer,
        request: &JSONRPCRequest,
        protocol_version: &str,
    ) -> Result<DispatchOutcome, GatewayError> {
        if request.is_notification() {
            return Ok(DispatchOutcome::Accepted);
        }
        let id = request.id.clone().unwrap_or(RequestId::Integer(0));

        let result: Value = match request.method.as_str() {
            "initialize" => {
                let result = InitializeResult {
                    protocol_version: protocol_version.to_string(),
                    capabilities: server.capabilities(),
                    server_info: Implementation {
                        name: SERVER_NAME.to_string(),
                        version: SERVER_VERSION.to_string(),
                    },
                    instructions: server.instructions().map(String::from),
                };
                serde_json::to_value(result)
                    .map_err(|e| GatewayError::Internal(e.to_string()))?
            }
            "ping" => json!({}),
            "tools/list" => serde_json::to_value(server.list_tools().await)
                .map_err(|e| GatewayError::Internal(e.to_string()))?,
            "tools/call" => {
                let params: CallToolRequestParam = match parse_params(request) {
                    Ok(params) => params,
                    Err(message) => {
                        return Ok(DispatchOutcome::Error(JSONRPCError::new(
                            Some(id),
                            INVALID_PARAMS,
                            message,
                        )))
                    }
                };
                let result = server.call_tool(params).await?;
                serde_json::to_value(result)
                    .map_err(|e| GatewayError::Internal(e.to_string()))?
            }
            "resources/list" => serde_json::to_value(server.list_resources().await)
                .map_err(|e| GatewayError::Internal(e.to_string()))?,
            "resources/read" => {
                let params: ReadResourceRequestParam = match parse_params(request) {
                    Ok(params) => params,
                    Err(message) => {
                        return Ok(DispatchOutcome::Error(JSONRPCError::new(
                            Some(id),
                            INVALID_PARAMS,
                            message,
                        )))
                    }
                };
                let result = server.read_resource(params).await?;
                serde_json::to_value(result)
                    .map_err(|e| GatewayError::Internal(e.to_string()))?
            }
            "resources/templates/list" => {
                serde_json::to_value(server.list_resource_templates().await)
                    .map_err(|e| GatewayError::Internal(e.to_string()))?
            }
            "prompts/list" => serde_json::to_value(server.list_prompts().await)
                .map_err(|e| GatewayError::Internal(e.to_string()))?,
            "prompts/get" => {
                let params: GetPromptRequestParam = match parse_params(request) {
                    Ok(params) => params,
                    Err(message) => {
                        return Ok(DispatchOutcome::Error(JSONRPCError::new(
                            Some(id),
                            INVALID_PARAMS,
                            message,
                        )))
                    }
                };
                let result = server.get_prompt(params).await?;
                serde_json::to_value(result)
                    .map_err(|e| GatewayError::Internal(e.to_string()))?
            }
            "completion/complete" => json!({}),
            other => {
                log::info!("Unknown method called: {other}");
                return Ok(DispatchOutcome::Error(JSONRPCError::new(
                    Some(id),
                    METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                )));
            }
        };

        Ok(DispatchOutcome::Response(JSONRPCResponse::new(id, result)))
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(request: &JSONRPCRequest) -> Result<T, String> {
    let params = request
        .params
        .clone()
        .ok_or_else(|| "missing params".to_string())?;
    serde_json::from_value(params).map_err(|e| format!("invalid params: {e}"))
}
