use async_trait::async_trait;
use http::StatusCode;
use serde_json::json;

use crate::{
    auth::access_control::AccessControl,
    errors::GatewayError,
    proxy::middleware::{Next, StreamMiddleware, StreamNext, ToolCall, ToolMiddleware},
    proxy::transport::StreamableResponse,
    types::CallToolResult,
};

/// Outermost pipeline stage: checks the caller against the tool before
/// any upstream leg runs.
///
/// On the unary path a denial becomes a benign `isError` result; on the
/// streaming path it becomes an HTTP error response with a JSON body.
/// Neither escapes the pipeline as an error.
pub struct AuthorizationMiddleware;

impl AuthorizationMiddleware {
    async fn authorize(call: &ToolCall) -> Result<(), GatewayError> {
        let mut access = AccessControl::new(
            call.ctx.identity.clone(),
            call.ctx.permissions.clone(),
            call.connection.id.clone(),
        )
        .with_tool_name(call.tool_name.clone());
        access.check(&[]).await
    }
}

#[async_trait]
impl ToolMiddleware for AuthorizationMiddleware {
    async fn handle(
        &self,
        call: &ToolCall,
        next: Next<'_>,
    ) -> Result<CallToolResult, GatewayError> {
        match Self::authorize(call).await {
            Ok(()) => next.run(call).await,
            Err(e) => Ok(CallToolResult::text_error(format!(
                "Authorization failed: {e}"
            ))),
        }
    }
}

#[async_trait]
impl StreamMiddleware for AuthorizationMiddleware {
    async fn handle(
        &self,
        call: &ToolCall,
        next: StreamNext<'_>,
    ) -> Result<StreamableResponse, GatewayError> {
        match Self::authorize(call).await {
            Ok(()) => next.run(call).await,
            Err(e) => {
                let status = match e.status_code() {
                    StatusCode::UNAUTHORIZED => StatusCode::UNAUTHORIZED,
                    _ => StatusCode::FORBIDDEN,
                };
                Ok(StreamableResponse::json(
                    status,
                    &json!({ "error": format!("Authorization failed: {e}") }),
                ))
            }
        }
    }
}
