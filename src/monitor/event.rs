use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{json, Value};

use crate::types::CallToolResult;

/// One structured record per tool invocation, unary or streaming.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallEvent {
    pub organization_id: String,
    pub connection_id: String,
    pub connection_title: String,
    pub tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    pub output: Value,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
    /// RFC 3339 timestamp of invocation start.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Normalizes a tool result for storage. When the result carries a
/// `structuredContent` object only that is kept, so text and structured
/// payloads are not stored twice; non-object values are wrapped as
/// `{value}`.
pub fn normalize_output(result: &Value) -> Value {
    if let Some(structured) = result.get("structuredContent") {
        if structured.is_object() {
            return structured.clone();
        }
    }
    if result.is_object() {
        result.clone()
    } else {
        json!({ "value": result })
    }
}

/// Error message of a unary result: the first text part when
/// `isError` is set.
pub fn extract_error_message(result: &CallToolResult) -> Option<String> {
    result.first_error_text().map(String::from)
}

/// Receives tool-call events. Sink failures never affect the user
/// response; callers log and swallow.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: ToolCallEvent);
}

/// Default sink: one structured log line per invocation.
#[derive(Default)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: ToolCallEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => log::info!(target: "audit", "{line}"),
            Err(e) => log::warn!("failed to serialize audit event: {e}"),
        }
    }
}

/// In-memory sink for inspection.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<ToolCallEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ToolCallEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: ToolCallEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_prefers_structured_content() {
        let raw = json!({
            "content": [{"type": "text", "text": "{\"n\":1}"}],
            "structuredContent": {"n": 1}
        });
        assert_eq!(normalize_output(&raw), json!({"n": 1}));
    }

    #[test]
    fn normalize_wraps_non_objects() {
        assert_eq!(normalize_output(&json!("plain")), json!({"value": "plain"}));
        assert_eq!(normalize_output(&json!([1, 2])), json!({"value": [1, 2]}));
    }

    #[test]
    fn normalize_keeps_plain_objects() {
        let raw = json!({"content": []});
        assert_eq!(normalize_output(&raw), raw);
    }

    #[test]
    fn error_extraction_reads_first_text_part() {
        let result = CallToolResult::text_error("Authorization failed: Access denied to: t");
        assert_eq!(
            extract_error_message(&result).as_deref(),
            Some("Authorization failed: Access denied to: t")
        );
    }
}
