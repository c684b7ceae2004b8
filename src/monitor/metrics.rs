use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};

/// Upstream tool-call latency, excluding authorization.
pub static TOOL_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "mesh_gateway_tool_call_duration_seconds",
        "Duration of upstream tool calls",
        &["connection", "tool"]
    )
    .expect("register tool call duration histogram")
});

/// Upstream tool-call outcomes.
pub static TOOL_CALLS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mesh_gateway_tool_calls_total",
        "Upstream tool calls by outcome",
        &["connection", "tool", "outcome"]
    )
    .expect("register tool call counter")
});

pub fn observe_tool_call(connection: &str, tool: &str, seconds: f64, success: bool) {
    TOOL_CALL_DURATION
        .with_label_values(&[connection, tool])
        .observe(seconds);
    let outcome = if success { "success" } else { "error" };
    TOOL_CALLS_TOTAL
        .with_label_values(&[connection, tool, outcome])
        .inc();
}
