/// One server-sent event addressed to a session on the legacy SSE
/// transport.
#[derive(Debug, Clone)]
pub struct SseEvent {
    data: String,
    event: Option<String>,
    pub session_id: String,
}

impl SseEvent {
    pub fn new_event(session_id: &str, event_type: &str, data: &str) -> Self {
        Self {
            event: Some(event_type.to_string()),
            data: data.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn new(session_id: &str, data: &str) -> Self {
        Self {
            data: data.to_string(),
            event: None,
            session_id: session_id.to_string(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.event {
            Some(event) => format!("event: {event}\r\ndata: {}\r\n\r\n", self.data).into_bytes(),
            None => self.data.clone().into_bytes(),
        }
    }
}
