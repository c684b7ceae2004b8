pub mod event;
pub mod metrics;
pub mod stream;
pub mod tracer;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::{
    errors::GatewayError,
    proxy::middleware::{Next, StreamMiddleware, StreamNext, ToolCall, ToolMiddleware},
    proxy::transport::StreamableResponse,
    types::CallToolResult,
};

use event::{extract_error_message, normalize_output, ToolCallEvent};
use stream::{observe_stream, StreamEventMeta};

/// Records one structured event per tool invocation. Sink failures never
/// reach the caller.
pub struct MonitoringMiddleware;

impl MonitoringMiddleware {
    fn base_event(call: &ToolCall, timestamp: String, started: Instant) -> ToolCallEvent {
        ToolCallEvent {
            organization_id: call.connection.organization_id.clone(),
            connection_id: call.connection.id.clone(),
            connection_title: call.connection.title.clone(),
            tool_name: call.tool_name.clone(),
            input: call.arguments.clone(),
            output: Value::Null,
            is_error: false,
            error_message: None,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp,
            user_id: call.ctx.identity.user_id().map(String::from),
            request_id: Some(call.ctx.request_id.clone()),
        }
    }
}

#[async_trait]
impl ToolMiddleware for MonitoringMiddleware {
    async fn handle(
        &self,
        call: &ToolCall,
        next: Next<'_>,
    ) -> Result<CallToolResult, GatewayError> {
        let started = Instant::now();
        let timestamp = Utc::now().to_rfc3339();

        let result = next.run(call).await;

        let mut event = Self::base_event(call, timestamp, started);
        match &result {
            Ok(tool_result) => {
                let raw = serde_json::to_value(tool_result).unwrap_or(Value::Null);
                event.output = normalize_output(&raw);
                event.is_error = tool_result.is_error == Some(true);
                event.error_message = extract_error_message(tool_result);
            }
            Err(e) => {
                event.output = normalize_output(&Value::Null);
                event.is_error = true;
                event.error_message = Some(e.to_string());
            }
        }
        call.ctx.audit.record(event);

        result
    }
}

#[async_trait]
impl StreamMiddleware for MonitoringMiddleware {
    async fn handle(
        &self,
        call: &ToolCall,
        next: StreamNext<'_>,
    ) -> Result<StreamableResponse, GatewayError> {
        let started = Instant::now();
        let timestamp = Utc::now().to_rfc3339();

        match next.run(call).await {
            Ok(response) => {
                let meta = StreamEventMeta {
                    organization_id: call.connection.organization_id.clone(),
                    connection_id: call.connection.id.clone(),
                    connection_title: call.connection.title.clone(),
                    tool_name: call.tool_name.clone(),
                    input: call.arguments.clone(),
                    user_id: call.ctx.identity.user_id().map(String::from),
                    request_id: Some(call.ctx.request_id.clone()),
                    timestamp,
                    started,
                    audit: call.ctx.audit.clone(),
                };
                Ok(observe_stream(response, meta))
            }
            Err(e) => {
                let mut event = Self::base_event(call, timestamp, started);
                event.output = normalize_output(&Value::Null);
                event.is_error = true;
                event.error_message = Some(e.to_string());
                call.ctx.audit.record(event);
                Err(e)
            }
        }
    }
}
