use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::{header, StatusCode};

use pingora::modules::http::{compression::ResponseCompressionBuilder, HttpModules};
use pingora_core::upstreams::peer::HttpPeer;
use pingora_error::{Error, ErrorType, Result};
use pingora_http::ResponseHeader;
use pingora_proxy::{ProxyHttp, Session};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::{
    config::{CLIENT_MESSAGE_ENDPOINT, CLIENT_SSE_ENDPOINT},
    context::{CallerIdentity, UserRole},
    errors::GatewayError,
    jsonrpc::{JSONRPCError, JSONRPCRequest, PARSE_ERROR},
    proxy::StreamableResponse,
    service::endpoint::{self, EndpointKind, MatchedEndpoint},
    service::handler::{DispatchOutcome, GatewayHandler, SessionParams},
    sse_event::SseEvent,
    types::{SSE_PROTOCOL_VERSION, STREAMABLE_PROTOCOL_VERSION},
    utils,
};

/// Per-request context. Everything session-scoped lives on the stack of
/// `request_filter`; pingora's proxying phase is never reached.
#[derive(Default)]
pub struct GatewayCtx;

/// The gateway front door: accepts MCP over streamable HTTP (plus the
/// legacy SSE pair), assembles the aggregated surface per session, and
/// answers every request in the filter phase.
pub struct GatewayService {
    tx: broadcast::Sender<SseEvent>,
    handler: Arc<GatewayHandler>,
}

impl GatewayService {
    pub fn new(tx: broadcast::Sender<SseEvent>, handler: Arc<GatewayHandler>) -> Self {
        Self { tx, handler }
    }

    pub fn event_sender(&self) -> &broadcast::Sender<SseEvent> {
        &self.tx
    }

    /// Helper method to build and send HTTP responses
    async fn build_and_send_response(
        &self,
        session: &mut Session,
        code: StatusCode,
        content_type: &str,
        body: Option<Bytes>,
    ) -> Result<bool> {
        let mut resp = ResponseHeader::build(code, None)?;

        resp.insert_header(header::CONTENT_TYPE, content_type)?;

        if let Some(body) = &body {
            resp.insert_header(header::CONTENT_LENGTH, body.len().to_string())?;
        }

        session.write_response_header(Box::new(resp), false).await?;

        session.write_response_body(body, true).await.map_err(|e| {
            log::error!("Failed to write response body: {e}");
            e
        })?;

        Ok(true)
    }

    /// Builds and sends an accepted response with empty body
    pub async fn response_accepted(&self, session: &mut Session) -> Result<()> {
        let _ = self
            .build_and_send_response(session, StatusCode::ACCEPTED, "text/plain", None)
            .await;
        Ok(())
    }

    /// Builds and sends a JSON response
    pub async fn response(
        &self,
        session: &mut Session,
        code: StatusCode,
        data: String,
    ) -> Result<bool> {
        let body = Bytes::from(data);
        self.build_and_send_response(session, code, "application/json", Some(body))
            .await
    }

    /// Maps a gateway error onto the wire: status code plus a JSON error
    /// body; internal errors get the generic envelope.
    pub async fn response_error(
        &self,
        session: &mut Session,
        tag: &str,
        error: GatewayError,
    ) -> Result<bool> {
        let status = error.status_code();
        log::error!("{tag} {error}");
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            serde_json::json!({"error": "Internal server error", "message": error.to_string()})
        } else {
            serde_json::json!({"error": error.to_string()})
        };
        self.response(session, status, body.to_string()).await
    }

    /// Sends a JSON-RPC error frame. Protocol-level failures ride a 200
    /// like any other JSON-RPC answer; only transport-level conditions
    /// use HTTP statuses.
    pub async fn response_rpc_error(
        &self,
        session: &mut Session,
        error: &JSONRPCError,
    ) -> Result<bool> {
        let data = serde_json::to_string(error).unwrap_or_else(|_| "{}".to_string());
        self.response(session, StatusCode::OK, data).await
    }

    /// Forwards a streaming upstream response to the client chunk by
    /// chunk.
    async fn response_stream(
        &self,
        session: &mut Session,
        response: StreamableResponse,
    ) -> Result<bool> {
        let mut resp = ResponseHeader::build(response.status, None)?;
        if let Some(content_type) = &response.content_type {
            resp.insert_header(header::CONTENT_TYPE, content_type.as_str())?;
        }
        session.write_response_header(Box::new(resp), false).await?;

        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    session.write_response_body(Some(bytes), false).await?;
                }
                Err(e) => {
                    log::error!("[proxy] upstream stream failed mid-flight: {e}");
                    break;
                }
            }
        }
        session.write_response_body(None, true).await?;
        Ok(true)
    }

    /// Handles Server-Sent Events (SSE) connection
    pub async fn response_sse(&self, session: &mut Session) -> Result<bool> {
        let mut resp = ResponseHeader::build(StatusCode::OK, Some(4))?;
        resp.insert_header(header::CONTENT_TYPE, "text/event-stream")?;
        resp.insert_header(header::CACHE_CONTROL, "no-cache")?;
        session.write_response_header(Box::new(resp), false).await?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let message_url = format!("{CLIENT_MESSAGE_ENDPOINT}?session_id={session_id}");
        let rx = self.tx.subscribe();

        self.handle_sse_stream(session, &session_id, &message_url, rx)
            .await
    }

    async fn handle_sse_stream(
        &self,
        session: &mut Session,
        session_id: &str,
        message_url: &str,
        mut rx: broadcast::Receiver<SseEvent>,
    ) -> Result<bool> {
        let body = stream! {
            yield SseEvent::new_event(session_id, "endpoint", message_url).to_bytes();

            while let Ok(event) = rx.recv().await {
                if event.session_id == session_id {
                    yield event.to_bytes();
                }
            }
        };

        let mut body_stream = Box::pin(body);
        while let Some(chunk) = body_stream.next().await {
            session
                .write_response_body(Some(chunk.into()), false)
                .await
                .map_err(|e| {
                    log::error!("Failed to send SSE event: {e}");
                    e
                })?;
        }

        Ok(true)
    }

    /// Parses a JSON-RPC request from the session body.
    async fn parse_json_rpc_request(
        &self,
        session: &mut Session,
    ) -> std::result::Result<JSONRPCRequest, GatewayError> {
        let body = self.read_body(session).await?;
        serde_json::from_slice::<JSONRPCRequest>(&body)
            .map_err(|e| GatewayError::BadRequest(format!("invalid JSON-RPC body: {e}")))
    }

    async fn read_body(
        &self,
        session: &mut Session,
    ) -> std::result::Result<Bytes, GatewayError> {
        let body = session
            .read_request_body()
            .await
            .map_err(|_| GatewayError::Aborted)?;
        body.ok_or_else(|| GatewayError::BadRequest("empty request body".to_string()))
    }

    /// Extracts tenant, identity and mode from the request headers and
    /// query string.
    fn session_params(&self, session: &Session) -> SessionParams {
        let header = session.req_header();
        let query = utils::request::query_to_map(&header.uri);

        let identity = if let Some(user_id) = utils::request::header_str(header, endpoint::USER_ID_HEADER)
        {
            let role = utils::request::header_str(header, endpoint::USER_ROLE_HEADER)
                .and_then(UserRole::parse)
                .unwrap_or(UserRole::User);
            Some(CallerIdentity::UserSession {
                user_id: user_id.to_string(),
                role,
            })
        } else {
            utils::request::header_str(header, endpoint::API_KEY_USER_HEADER).map(|user_id| {
                CallerIdentity::ApiKey {
                    user_id: user_id.to_string(),
                }
            })
        };

        SessionParams {
            org_id: utils::request::header_str(header, endpoint::ORG_ID_HEADER).map(String::from),
            org_slug: utils::request::header_str(header, endpoint::ORG_SLUG_HEADER)
                .map(String::from),
            virtual_mcp_id: utils::request::header_str(header, endpoint::VIRTUAL_MCP_ID_HEADER)
                .map(String::from),
            identity,
            caller_connection_id: utils::request::header_str(header, endpoint::CALLER_ID_HEADER)
                .map(String::from),
            mode: query.get("mode").cloned(),
        }
    }

    fn log_tag(kind: EndpointKind) -> &'static str {
        match kind {
            EndpointKind::Mesh => "[mesh]",
            EndpointKind::Connection | EndpointKind::ConnectionStream => "[gateway]",
            _ => "[virtual-mcp]",
        }
    }

    /// One unary MCP exchange: resolve, assemble, dispatch, release.
    async fn handle_mcp_post(
        &self,
        matched: &MatchedEndpoint,
        session: &mut Session,
    ) -> Result<bool> {
        let tag = Self::log_tag(matched.kind);
        let params = self.session_params(session);

        let request = match self.parse_json_rpc_request(session).await {
            Ok(request) => request,
            Err(GatewayError::Aborted) => {
                return self.response_error(session, tag, GatewayError::Aborted).await
            }
            Err(e) => {
                let error = JSONRPCError::new(None, PARSE_ERROR, e.to_string());
                return self.response_rpc_error(session, &error).await;
            }
        };

        match self.run_session(matched, &params, &request).await {
            Ok(DispatchOutcome::Response(response)) => {
                let data = serde_json::to_string(&response)
                    .unwrap_or_else(|_| "{}".to_string());
                self.response(session, StatusCode::OK, data).await
            }
            Ok(DispatchOutcome::Error(error)) => {
                self.response_rpc_error(session, &error).await
            }
            Ok(DispatchOutcome::Accepted) => {
                self.response_accepted(session).await?;
                Ok(true)
            }
            Err(e) => self.response_error(session, tag, e).await,
        }
    }

    /// Assembles the virtual surface for this endpoint and dispatches one
    /// request against it. The collection is released on every exit
    /// path.
    async fn run_session(
        &self,
        matched: &MatchedEndpoint,
        params: &SessionParams,
        request: &JSONRPCRequest,
    ) -> std::result::Result<DispatchOutcome, GatewayError> {
        let handler = &self.handler;
        let organization_id = handler.resolve_tenant(params)?;

        let server = match matched.kind {
            EndpointKind::Connection => {
                let connection_id = matched
                    .connection_id
                    .as_deref()
                    .ok_or(GatewayError::ConnectionNotFound)?;
                let entity = handler.direct_entity(connection_id, organization_id.as_deref())?;
                let ctx = handler
                    .session_context(Some(entity.organization_id.clone()), params);
                let strategy = handler.session_strategy(params.mode.as_deref(), &entity);
                handler.build_virtual(entity, &ctx, strategy)
            }
            EndpointKind::Mesh => {
                let slug = matched
                    .org_slug
                    .as_deref()
                    .ok_or(GatewayError::TenantNotFound)?;
                let tenant =
                    crate::store::tenant_fetch_by_slug(slug).ok_or(GatewayError::TenantNotFound)?;
                let ctx = handler.session_context(Some(tenant.id.clone()), params);
                let strategy = handler.session_strategy(params.mode.as_deref(),
                    &crate::config::VirtualMcp::default_agent(&tenant.id));
                handler.build_mesh(&tenant.id, &ctx, strategy)
            }
            _ => {
                let id = matched
                    .id
                    .clone()
                    .or_else(|| params.virtual_mcp_id.clone());
                let entity = handler
                    .resolve_virtual_entity(id.as_deref(), organization_id.as_deref())?;
                let ctx = handler
                    .session_context(Some(entity.organization_id.clone()), params);
                let strategy = handler.session_strategy(params.mode.as_deref(), &entity);
                handler.build_virtual(entity, &ctx, strategy)
            }
        };

        let outcome = handler
            .dispatch(&server, request, STREAMABLE_PROTOCOL_VERSION)
            .await;
        server.release();
        outcome
    }

    /// One streaming tool call: raw JSON arguments in, upstream stream
    /// out.
    async fn handle_stream_post(
        &self,
        matched: &MatchedEndpoint,
        session: &mut Session,
    ) -> Result<bool> {
        let tag = Self::log_tag(matched.kind);
        let params = self.session_params(session);

        let tool_name = match matched.tool_name.as_deref() {
            Some(name) => name.to_string(),
            None => {
                return self
                    .response_error(
                        session,
                        tag,
                        GatewayError::BadRequest("missing tool name".to_string()),
                    )
                    .await
            }
        };

        let arguments: Value = match self.read_body(session).await {
            Ok(body) => match serde_json::from_slice(&body) {
                Ok(value) => value,
                Err(e) => {
                    return self
                        .response_error(
                            session,
                            tag,
                            GatewayError::BadRequest(format!("invalid tool-call body: {e}")),
                        )
                        .await
                }
            },
            Err(e) => return self.response_error(session, tag, e).await,
        };

        let streamed = self
            .run_stream_session(matched, &params, &tool_name, arguments)
            .await;
        match streamed {
            Ok(response) => self.response_stream(session, response).await,
            Err(e) => self.response_error(session, tag, e).await,
        }
    }

    async fn run_stream_session(
        &self,
        matched: &MatchedEndpoint,
        params: &SessionParams,
        tool_name: &str,
        arguments: Value,
    ) -> std::result::Result<StreamableResponse, GatewayError> {
        let handler = &self.handler;
        let organization_id = handler.resolve_tenant(params)?;

        let entity = match matched.kind {
            EndpointKind::ConnectionStream => {
                let connection_id = matched
                    .connection_id
                    .as_deref()
                    .ok_or(GatewayError::ConnectionNotFound)?;
                handler.direct_entity(connection_id, organization_id.as_deref())?
            }
            _ => handler
                .resolve_virtual_entity(matched.id.as_deref(), organization_id.as_deref())?,
        };

        let ctx = handler.session_context(Some(entity.organization_id.clone()), params);
        let strategy = handler.session_strategy(params.mode.as_deref(), &entity);
        let server = handler.build_virtual(entity, &ctx, strategy);

        let outcome = server
            .call_streamable_tool(tool_name, Some(arguments))
            .await;
        server.release();
        outcome
    }

    /// Legacy message endpoint: the response travels back over the SSE
    /// stream named by `session_id`, the POST itself is merely accepted.
    async fn handle_message_endpoint(&self, session: &mut Session) -> Result<bool> {
        let params = self.session_params(session);
        let query = utils::request::query_to_map(&session.req_header().uri);
        let Some(session_id) = query.get("session_id").cloned() else {
            return self
                .response_error(
                    session,
                    "[virtual-mcp]",
                    GatewayError::BadRequest("'session_id' query parameter is missing".to_string()),
                )
                .await;
        };

        let request = match self.parse_json_rpc_request(session).await {
            Ok(request) => request,
            Err(GatewayError::Aborted) => {
                return self
                    .response_error(session, "[virtual-mcp]", GatewayError::Aborted)
                    .await
            }
            Err(e) => {
                let error = JSONRPCError::new(None, PARSE_ERROR, e.to_string());
                return self.response_rpc_error(session, &error).await;
            }
        };

        let matched = MatchedEndpoint {
            kind: EndpointKind::VirtualMcpDefault,
            id: None,
            org_slug: None,
            connection_id: None,
            tool_name: None,
        };

        match self.run_legacy_session(&matched, &params, &request).await {
            Ok(DispatchOutcome::Response(response)) => {
                let data = serde_json::to_string(&response)
                    .unwrap_or_else(|_| "{}".to_string());
                self.send_sse_message(&session_id, &data);
                self.response_accepted(session).await?;
                Ok(true)
            }
            Ok(DispatchOutcome::Error(error)) => {
                let data = serde_json::to_string(&error).unwrap_or_else(|_| "{}".to_string());
                self.send_sse_message(&session_id, &data);
                self.response_accepted(session).await?;
                Ok(true)
            }
            Ok(DispatchOutcome::Accepted) => {
                self.response_accepted(session).await?;
                Ok(true)
            }
            Err(e) => self.response_error(session, "[virtual-mcp]", e).await,
        }
    }

    fn send_sse_message(&self, session_id: &str, data: &str) {
        let event = SseEvent::new_event(session_id, "message", data);
        if let Err(e) = self.tx.send(event) {
            log::error!("Failed to send SSE event: {e}");
        }
    }

    async fn run_legacy_session(
        &self,
        matched: &MatchedEndpoint,
        params: &SessionParams,
        request: &JSONRPCRequest,
    ) -> std::result::Result<DispatchOutcome, GatewayError> {
        let handler = &self.handler;
        let organization_id = handler.resolve_tenant(params)?;
        let id = params.virtual_mcp_id.clone();
        let entity =
            handler.resolve_virtual_entity(id.as_deref(), organization_id.as_deref())?;
        let ctx = handler.session_context(Some(entity.organization_id.clone()), params);
        let strategy = handler.session_strategy(params.mode.as_deref(), &entity);
        let server = handler.build_virtual(entity, &ctx, strategy);

        let outcome = handler.dispatch(&server, request, SSE_PROTOCOL_VERSION).await;
        server.release();
        outcome
    }
}

#[async_trait]
impl ProxyHttp for GatewayService {
    type CTX = GatewayCtx;

    fn new_ctx(&self) -> Self::CTX {
        GatewayCtx
    }

    fn init_downstream_modules(&self, modules: &mut HttpModules) {
        // Disabled-by-default compression, enabled per accept-encoding.
        modules.add_module(ResponseCompressionBuilder::enable(0));
    }

    /// Every request is fully answered here; the proxying phase is never
    /// reached.
    async fn request_filter(&self, session: &mut Session, _ctx: &mut Self::CTX) -> Result<bool> {
        let path = session.req_header().uri.path().to_string();
        let method = session.req_header().method.clone();

        let Some(matched) = endpoint::match_endpoint(&path) else {
            log::warn!("Route({path}) not found, responding with 404");
            session.respond_error(StatusCode::NOT_FOUND.as_u16()).await?;
            return Ok(true);
        };

        match matched.kind {
            EndpointKind::Sse => {
                if path == CLIENT_SSE_ENDPOINT && method == http::Method::GET {
                    return self.response_sse(session).await;
                }
                session
                    .respond_error(StatusCode::METHOD_NOT_ALLOWED.as_u16())
                    .await?;
                Ok(true)
            }
            EndpointKind::Message => {
                if method != http::Method::POST {
                    session
                        .respond_error(StatusCode::METHOD_NOT_ALLOWED.as_u16())
                        .await?;
                    return Ok(true);
                }
                self.handle_message_endpoint(session).await
            }
            EndpointKind::ConnectionStream | EndpointKind::VirtualMcpStream => {
                if method != http::Method::POST {
                    session
                        .respond_error(StatusCode::METHOD_NOT_ALLOWED.as_u16())
                        .await?;
                    return Ok(true);
                }
                self.handle_stream_post(&matched, session).await
            }
            _ => match method {
                // GET on an MCP endpoint opens the built-in SSE stream.
                http::Method::GET => self.response_sse(session).await,
                http::Method::POST => self.handle_mcp_post(&matched, session).await,
                _ => {
                    session
                        .respond_error(StatusCode::METHOD_NOT_ALLOWED.as_u16())
                        .await?;
                    Ok(true)
                }
            },
        }
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        // Unreachable: request_filter answers everything.
        Error::e_explain(
            ErrorType::InternalError,
            "gateway answers all requests in the filter phase",
        )
    }
}
