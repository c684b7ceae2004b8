use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use futures::StreamExt;
use http::StatusCode;
use serde_json::Value;

use crate::monitor::event::{AuditSink, ToolCallEvent};
use crate::proxy::transport::StreamableResponse;

/// Capture cap for streamed response bodies.
pub const STREAM_CAPTURE_LIMIT: usize = 262_144;

/// Everything the capture side needs to finish the event after the client
/// stream is done.
pub struct StreamEventMeta {
    pub organization_id: String,
    pub connection_id: String,
    pub connection_title: String,
    pub tool_name: String,
    pub input: Option<Value>,
    pub user_id: Option<String>,
    pub request_id: Option<String>,
    pub timestamp: String,
    pub started: Instant,
    pub audit: Arc<dyn AuditSink>,
}

struct Capture {
    buffer: Vec<u8>,
    truncated: bool,
}

impl Capture {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.buffer.len() >= STREAM_CAPTURE_LIMIT {
            self.truncated = true;
            return;
        }
        let room = STREAM_CAPTURE_LIMIT - self.buffer.len();
        if chunk.len() > room {
            self.buffer.extend_from_slice(&chunk[..room]);
            self.truncated = true;
        } else {
            self.buffer.extend_from_slice(chunk);
        }
    }
}

/// Wraps a streaming response so the full body keeps flowing to the
/// client while the first [`STREAM_CAPTURE_LIMIT`] bytes are copied
/// aside; the monitoring event is emitted once the stream ends.
pub fn observe_stream(response: StreamableResponse, meta: StreamEventMeta) -> StreamableResponse {
    let StreamableResponse {
        status,
        content_type,
        mut body,
    } = response;
    let captured_content_type = content_type.clone();

    let monitored = stream! {
        let mut capture = Capture::new();
        let mut transport_error: Option<String> = None;
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    capture.push(&bytes);
                    yield Ok(bytes);
                }
                Err(e) => {
                    transport_error = Some(e.to_string());
                    yield Err(e);
                    break;
                }
            }
        }
        finish_event(status, captured_content_type.as_deref(), capture, transport_error, &meta);
    };

    StreamableResponse {
        status,
        content_type,
        body: Box::pin(monitored),
    }
}

fn finish_event(
    status: StatusCode,
    content_type: Option<&str>,
    capture: Capture,
    transport_error: Option<String>,
    meta: &StreamEventMeta,
) {
    let is_json = content_type.is_some_and(|ct| ct.contains("application/json"));
    let body_text = String::from_utf8_lossy(&capture.buffer).to_string();
    let body_value: Value = if is_json {
        serde_json::from_str(&body_text).unwrap_or(Value::String(body_text.clone()))
    } else {
        Value::String(body_text.clone())
    };

    let is_error = status.as_u16() >= 400 || transport_error.is_some();
    let error_message = if let Some(transport) = transport_error {
        Some(transport)
    } else if status.as_u16() >= 400 {
        let from_body = body_value
            .get("error")
            .and_then(Value::as_str)
            .map(String::from);
        Some(from_body.unwrap_or_else(|| {
            if body_text.is_empty() {
                format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or_default()
                )
            } else {
                body_text.chars().take(500).collect()
            }
        }))
    } else if capture.truncated {
        Some(format!(
            "Response body truncated to {STREAM_CAPTURE_LIMIT} bytes"
        ))
    } else {
        None
    };

    let event = ToolCallEvent {
        organization_id: meta.organization_id.clone(),
        connection_id: meta.connection_id.clone(),
        connection_title: meta.connection_title.clone(),
        tool_name: meta.tool_name.clone(),
        input: meta.input.clone(),
        output: super::event::normalize_output(&body_value),
        is_error,
        error_message,
        duration_ms: meta.started.elapsed().as_millis() as u64,
        timestamp: meta.timestamp.clone(),
        user_id: meta.user_id.clone(),
        request_id: meta.request_id.clone(),
    };
    meta.audit.record(event);
}
