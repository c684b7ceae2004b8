use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    auth::{delegation::DelegationSigner, AuthorizationMiddleware},
    config::Connection,
    context::RequestContext,
    errors::GatewayError,
    monitor::{metrics, MonitoringMiddleware},
    proxy::credentials::CredentialBinder,
    proxy::middleware::{
        StreamEndpoint, StreamPipeline, ToolCall, ToolEndpoint, ToolPipeline,
    },
    proxy::transport::{ProxyTransport, StreamableResponse},
    types::{
        CallToolResult, GetPromptRequestParam, GetPromptResult, ListPromptsResult,
        ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, Prompt,
        ReadResourceRequestParam, ReadResourceResult, Resource, ResourceTemplate,
        ServerCapabilities, Tool,
    },
};

/// A live session to one upstream MCP server: wire adapter, credential
/// binding, and the authorization + monitoring pipeline around tool
/// calls.
///
/// Owned exclusively by the collection that created it; release is called
/// by the front door when the client session ends.
pub struct ConnectionProxy {
    connection: Arc<Connection>,
    ctx: Arc<RequestContext>,
    transport: Arc<ProxyTransport>,
    binder: Arc<CredentialBinder>,
    unary: ToolPipeline,
    streaming: StreamPipeline,
    released: AtomicBool,
}

/// Innermost unary stage: the upstream `tools/call` leg. Emits one span
/// and one histogram/counter observation per invocation; authorization
/// failures never reach this stage and are therefore never recorded as
/// upstream errors.
struct UpstreamToolCall {
    transport: Arc<ProxyTransport>,
    binder: Arc<CredentialBinder>,
}

#[async_trait]
impl ToolEndpoint for UpstreamToolCall {
    async fn invoke(&self, call: &ToolCall) -> Result<CallToolResult, GatewayError> {
        let headers = self.binder.ensure().await;
        call.ctx.tracer.record_span(
            "mcp.proxy.callTool",
            &[
                ("connection.id", call.connection.id.clone()),
                ("tool.name", call.tool_name.clone()),
            ],
        );

        let params = json!({
            "name": call.tool_name,
            "arguments": call.arguments.clone().unwrap_or(Value::Object(Default::default())),
        });

        let started = Instant::now();
        let outcome = self
            .transport
            .request("tools/call", Some(params), headers)
            .await;
        metrics::observe_tool_call(
            &call.connection.id,
            &call.tool_name,
            started.elapsed().as_secs_f64(),
            outcome.is_ok(),
        );

        let result = outcome?;
        serde_json::from_value::<CallToolResult>(result)
            .map_err(|e| GatewayError::Transport(format!("malformed tool result: {e}")))
    }
}

/// Innermost streaming stage: raw POST to the upstream's call-tool
/// endpoint, response handed back unchanged.
struct UpstreamStreamCall {
    transport: Arc<ProxyTransport>,
    binder: Arc<CredentialBinder>,
}

#[async_trait]
impl StreamEndpoint for UpstreamStreamCall {
    async fn invoke(&self, call: &ToolCall) -> Result<StreamableResponse, GatewayError> {
        let headers = self.binder.ensure().await;
        call.ctx.tracer.record_span(
            "mcp.proxy.callStreamableTool",
            &[
                ("connection.id", call.connection.id.clone()),
                ("tool.name", call.tool_name.clone()),
            ],
        );

        let arguments = call.arguments.clone().unwrap_or(Value::Object(Default::default()));
        let started = Instant::now();
        let outcome = self
            .transport
            .post_streaming(&call.tool_name, &arguments, headers)
            .await;
        let success = outcome
            .as_ref()
            .map(|response| response.status.as_u16() < 400)
            .unwrap_or(false);
        metrics::observe_tool_call(
            &call.connection.id,
            &call.tool_name,
            started.elapsed().as_secs_f64(),
            success,
        );
        outcome
    }
}

impl ConnectionProxy {
    pub fn new(
        connection: Arc<Connection>,
        ctx: Arc<RequestContext>,
        signer: Arc<DelegationSigner>,
    ) -> Result<Self, GatewayError> {
        let transport = Arc::new(ProxyTransport::http_streamable(&connection.url)?);
        let binder = Arc::new(CredentialBinder::new(
            connection.clone(),
            ctx.clone(),
            signer,
        ));

        // Monitoring sits outside authorization so denials are still
        // recorded as semantic errors; the upstream histogram lives at
        // the endpoint and never sees authorization time.
        let unary = ToolPipeline::new(
            vec![
                Arc::new(MonitoringMiddleware),
                Arc::new(AuthorizationMiddleware),
            ],
            Arc::new(UpstreamToolCall {
                transport: transport.clone(),
                binder: binder.clone(),
            }),
        );
        let streaming = StreamPipeline::new(
            vec![
                Arc::new(MonitoringMiddleware),
                Arc::new(AuthorizationMiddleware),
            ],
            Arc::new(UpstreamStreamCall {
                transport: transport.clone(),
                binder: binder.clone(),
            }),
        );

        Ok(Self {
            connection,
            ctx,
            transport,
            binder,
            unary,
            streaming,
            released: AtomicBool::new(false),
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Capabilities the upstream advertised at registration, if known.
    pub fn capabilities(&self) -> Option<&ServerCapabilities> {
        self.connection.capabilities.as_ref()
    }

    /// Lists tools, serving the connection's cached index without
    /// upstream I/O when one is present.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, GatewayError> {
        if let Some(index) = &self.connection.tool_index {
            return Ok(index.clone());
        }
        let headers = self.binder.ensure().await;
        let result = self.transport.request("tools/list", None, headers).await?;
        let listing: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| GatewayError::Transport(format!("malformed tools/list result: {e}")))?;
        Ok(listing.tools)
    }

    /// Invokes a tool through the authorization + monitoring pipeline.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, GatewayError> {
        let call = self.tool_call(name, arguments);
        self.unary.execute(&call).await
    }

    /// Invokes a tool whose response is an HTTP stream, bypassing the
    /// JSON-RPC envelope.
    pub async fn call_streamable(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<StreamableResponse, GatewayError> {
        let call = self.tool_call(name, arguments);
        self.streaming.execute(&call).await
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>, GatewayError> {
        let headers = self.binder.ensure().await;
        let result = self
            .transport
            .request("resources/list", None, headers)
            .await?;
        let listing: ListResourcesResult = serde_json::from_value(result).map_err(|e| {
            GatewayError::Transport(format!("malformed resources/list result: {e}"))
        })?;
        Ok(listing.resources)
    }

    pub async fn read_resource(
        &self,
        params: &ReadResourceRequestParam,
    ) -> Result<ReadResourceResult, GatewayError> {
        let headers = self.binder.ensure().await;
        let result = self
            .transport
            .request(
                "resources/read",
                Some(serde_json::to_value(params).unwrap_or_default()),
                headers,
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| GatewayError::Transport(format!("malformed resources/read result: {e}")))
    }

    pub async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>, GatewayError> {
        let headers = self.binder.ensure().await;
        let result = self
            .transport
            .request("resources/templates/list", None, headers)
            .await?;
        let listing: ListResourceTemplatesResult = serde_json::from_value(result).map_err(|e| {
            GatewayError::Transport(format!("malformed resources/templates/list result: {e}"))
        })?;
        Ok(listing.resource_templates)
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>, GatewayError> {
        let headers = self.binder.ensure().await;
        let result = self
            .transport
            .request("prompts/list", None, headers)
            .await?;
        let listing: ListPromptsResult = serde_json::from_value(result)
            .map_err(|e| GatewayError::Transport(format!("malformed prompts/list result: {e}")))?;
        Ok(listing.prompts)
    }

    pub async fn get_prompt(
        &self,
        params: &GetPromptRequestParam,
    ) -> Result<GetPromptResult, GatewayError> {
        let headers = self.binder.ensure().await;
        let result = self
            .transport
            .request(
                "prompts/get",
                Some(serde_json::to_value(params).unwrap_or_default()),
                headers,
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| GatewayError::Transport(format!("malformed prompts/get result: {e}")))
    }

    /// Closes the owned transport. Idempotent; close errors are
    /// swallowed.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transport.close();
    }

    fn tool_call(&self, name: &str, arguments: Option<Value>) -> ToolCall {
        ToolCall {
            connection: self.connection.clone(),
            ctx: self.ctx.clone(),
            tool_name: name.to_string(),
            arguments,
        }
    }
}

impl Drop for ConnectionProxy {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            log::warn!(
                "[proxy] proxy for {} dropped without release",
                self.connection.id
            );
            self.transport.close();
        }
    }
}
