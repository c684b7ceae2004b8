use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{header, HeaderMap, StatusCode};
use serde_json::Value;
use url::Url;

use crate::{
    errors::GatewayError,
    jsonrpc::{JSONRPCMessage, JSONRPCRequest},
    types::RequestId,
};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

/// A streaming upstream response handed back to the client untouched.
pub struct StreamableResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl StreamableResponse {
    pub fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(GatewayError::from))
            .boxed();
        Self {
            status,
            content_type,
            body,
        }
    }

    /// A synthesized single-document JSON response (authorization denials,
    /// meta-tool results).
    pub fn json(status: StatusCode, value: &Value) -> Self {
        let bytes = Bytes::from(value.to_string());
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: futures::stream::once(async move { Ok(bytes) }).boxed(),
        }
    }

    /// Drains the body into one buffer. Test and meta-tool helper; the
    /// serving path streams chunk by chunk instead.
    pub async fn collect(mut self) -> Result<(StatusCode, Vec<u8>), GatewayError> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok((self.status, buf))
    }
}

/// Wire adapter to one upstream MCP server. Tagged variants rather than
/// trait objects; new transports (stdio, …) become new variants.
pub enum ProxyTransport {
    HttpStreamable(HttpStreamableTransport),
}

impl ProxyTransport {
    pub fn http_streamable(url: &str) -> Result<Self, GatewayError> {
        Ok(ProxyTransport::HttpStreamable(HttpStreamableTransport::new(
            url,
        )?))
    }

    /// Sends one JSON-RPC request and returns its `result`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        headers: &HeaderMap,
    ) -> Result<Value, GatewayError> {
        match self {
            ProxyTransport::HttpStreamable(transport) => {
                transport.request(method, params, headers).await
            }
        }
    }

    /// Issues a raw streaming tool call, bypassing the JSON-RPC envelope.
    pub async fn post_streaming(
        &self,
        tool_name: &str,
        arguments: &Value,
        headers: &HeaderMap,
    ) -> Result<StreamableResponse, GatewayError> {
        match self {
            ProxyTransport::HttpStreamable(transport) => {
                transport.post_streaming(tool_name, arguments, headers).await
            }
        }
    }

    /// Closes the transport. Idempotent; close failures are swallowed by
    /// the caller.
    pub fn close(&self) {
        match self {
            ProxyTransport::HttpStreamable(transport) => transport.close(),
        }
    }
}

/// Streamable-HTTP MCP client: JSON-RPC over POST, answers arrive either
/// as a single JSON document or as a one-message SSE frame.
pub struct HttpStreamableTransport {
    client: reqwest::Client,
    endpoint: Url,
    next_id: AtomicI64,
}

impl HttpStreamableTransport {
    pub fn new(url: &str) -> Result<Self, GatewayError> {
        let endpoint = Url::parse(url)
            .map_err(|e| GatewayError::Transport(format!("invalid upstream url {url}: {e}")))?;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(GatewayError::from)?;
        Ok(Self {
            client,
            endpoint,
            next_id: AtomicI64::new(1),
        })
    }

    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        headers: &HeaderMap,
    ) -> Result<Value, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JSONRPCRequest::new(RequestId::Integer(id), method, params);

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(headers.clone())
            .header(header::ACCEPT, "application/json, text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(GatewayError::from)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamAuth(truncate(&body, 500)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                message: truncate(&body, 500),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.map_err(GatewayError::from)?;

        let message = if content_type.contains("text/event-stream") {
            parse_sse_message(&body).ok_or_else(|| {
                GatewayError::Transport("no JSON-RPC message in event stream".to_string())
            })?
        } else {
            serde_json::from_str::<JSONRPCMessage>(&body)
                .map_err(|e| GatewayError::Transport(format!("decode failure: {e}")))?
        };

        match message {
            JSONRPCMessage::Response(response) => Ok(response.result),
            JSONRPCMessage::Error(error) => Err(GatewayError::Upstream {
                status: status.as_u16(),
                message: error.error.message,
            }),
            JSONRPCMessage::Request(_) => Err(GatewayError::Transport(
                "upstream sent a request where a response was expected".to_string(),
            )),
        }
    }

    pub async fn post_streaming(
        &self,
        tool_name: &str,
        arguments: &Value,
        headers: &HeaderMap,
    ) -> Result<StreamableResponse, GatewayError> {
        let url = self
            .call_tool_url(tool_name)
            .map_err(|e| GatewayError::Transport(format!("invalid call-tool url: {e}")))?;

        let response = self
            .client
            .post(url)
            .headers(headers.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .json(arguments)
            .send()
            .await
            .map_err(GatewayError::from)?;

        Ok(StreamableResponse::from_reqwest(response))
    }

    fn call_tool_url(&self, tool_name: &str) -> Result<Url, url::ParseError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
            segments.pop_if_empty();
            segments.push("call-tool");
            segments.push(tool_name);
        }
        Ok(url)
    }

    pub fn close(&self) {
        // reqwest pools close with the client; nothing to flush here.
        log::debug!("closing transport for {}", self.endpoint);
    }
}

/// Extracts the first JSON-RPC message from a single-message SSE body.
fn parse_sse_message(body: &str) -> Option<JSONRPCMessage> {
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            if let Ok(message) = serde_json::from_str::<JSONRPCMessage>(data) {
                match &message {
                    JSONRPCMessage::Response(_) | JSONRPCMessage::Error(_) => return Some(message),
                    JSONRPCMessage::Request(_) => continue,
                }
            }
        }
    }
    None
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut end = limit;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}
