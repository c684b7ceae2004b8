use std::sync::{Arc, Mutex};

/// Minimal span-recording seam. The gateway emits one span per upstream
/// tool call; anything richer (exporters, sampling) lives behind an
/// implementation of this trait.
pub trait Tracer: Send + Sync {
    fn record_span(&self, name: &str, attributes: &[(&str, String)]);
}

/// Default tracer: spans become debug log lines.
#[derive(Default)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn record_span(&self, name: &str, attributes: &[(&str, String)]) {
        log::debug!("span {name} {attributes:?}");
    }
}

/// A recorded span, for inspection.
#[derive(Debug, Clone)]
pub struct RecordedSpan {
    pub name: String,
    pub attributes: Vec<(String, String)>,
}

/// In-memory tracer used to assert which upstream legs actually ran.
#[derive(Default)]
pub struct RecordingTracer {
    spans: Mutex<Vec<RecordedSpan>>,
}

impl RecordingTracer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spans(&self) -> Vec<RecordedSpan> {
        self.spans.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn spans_named(&self, name: &str) -> Vec<RecordedSpan> {
        self.spans()
            .into_iter()
            .filter(|span| span.name == name)
            .collect()
    }
}

impl Tracer for RecordingTracer {
    fn record_span(&self, name: &str, attributes: &[(&str, String)]) {
        self.spans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedSpan {
                name: name.to_string(),
                attributes: attributes
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), v.clone()))
                    .collect(),
            });
    }
}
