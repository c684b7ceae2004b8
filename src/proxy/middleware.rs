use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    config::Connection, context::RequestContext, errors::GatewayError,
    proxy::transport::StreamableResponse, types::CallToolResult,
};

/// One tool invocation as seen by the pipeline.
pub struct ToolCall {
    pub connection: Arc<Connection>,
    pub ctx: Arc<RequestContext>,
    pub tool_name: String,
    pub arguments: Option<Value>,
}

/// Unary middleware: receives the call and decides whether and when to
/// run `next`. The outermost middleware is applied first.
#[async_trait]
pub trait ToolMiddleware: Send + Sync {
    async fn handle(&self, call: &ToolCall, next: Next<'_>)
        -> Result<CallToolResult, GatewayError>;
}

/// Innermost stage of the unary pipeline: the upstream call.
#[async_trait]
pub trait ToolEndpoint: Send + Sync {
    async fn invoke(&self, call: &ToolCall) -> Result<CallToolResult, GatewayError>;
}

pub struct Next<'a> {
    rest: &'a [Arc<dyn ToolMiddleware>],
    endpoint: &'a dyn ToolEndpoint,
}

impl Next<'_> {
    pub async fn run(self, call: &ToolCall) -> Result<CallToolResult, GatewayError> {
        match self.rest.split_first() {
            Some((middleware, rest)) => {
                middleware
                    .handle(
                        call,
                        Next {
                            rest,
                            endpoint: self.endpoint,
                        },
                    )
                    .await
            }
            None => self.endpoint.invoke(call).await,
        }
    }
}

/// Ordered unary pipeline, composed once per proxy at build time.
pub struct ToolPipeline {
    middlewares: Vec<Arc<dyn ToolMiddleware>>,
    endpoint: Arc<dyn ToolEndpoint>,
}

impl ToolPipeline {
    pub fn new(middlewares: Vec<Arc<dyn ToolMiddleware>>, endpoint: Arc<dyn ToolEndpoint>) -> Self {
        Self {
            middlewares,
            endpoint,
        }
    }

    pub async fn execute(&self, call: &ToolCall) -> Result<CallToolResult, GatewayError> {
        Next {
            rest: &self.middlewares,
            endpoint: self.endpoint.as_ref(),
        }
        .run(call)
        .await
    }
}

/// Streaming middleware mirror of [`ToolMiddleware`].
#[async_trait]
pub trait StreamMiddleware: Send + Sync {
    async fn handle(
        &self,
        call: &ToolCall,
        next: StreamNext<'_>,
    ) -> Result<StreamableResponse, GatewayError>;
}

#[async_trait]
pub trait StreamEndpoint: Send + Sync {
    async fn invoke(&self, call: &ToolCall) -> Result<StreamableResponse, GatewayError>;
}

pub struct StreamNext<'a> {
    rest: &'a [Arc<dyn StreamMiddleware>],
    endpoint: &'a dyn StreamEndpoint,
}

impl StreamNext<'_> {
    pub async fn run(self, call: &ToolCall) -> Result<StreamableResponse, GatewayError> {
        match self.rest.split_first() {
            Some((middleware, rest)) => {
                middleware
                    .handle(
                        call,
                        StreamNext {
                            rest,
                            endpoint: self.endpoint,
                        },
                    )
                    .await
            }
            None => self.endpoint.invoke(call).await,
        }
    }
}

/// Ordered streaming pipeline, composed once per proxy at build time.
pub struct StreamPipeline {
    middlewares: Vec<Arc<dyn StreamMiddleware>>,
    endpoint: Arc<dyn StreamEndpoint>,
}

impl StreamPipeline {
    pub fn new(
        middlewares: Vec<Arc<dyn StreamMiddleware>>,
        endpoint: Arc<dyn StreamEndpoint>,
    ) -> Self {
        Self {
            middlewares,
            endpoint,
        }
    }

    pub async fn execute(&self, call: &ToolCall) -> Result<StreamableResponse, GatewayError> {
        StreamNext {
            rest: &self.middlewares,
            endpoint: self.endpoint.as_ref(),
        }
        .run(call)
        .await
    }
}
