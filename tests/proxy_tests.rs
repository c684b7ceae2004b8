mod common;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mesh_gateway::auth::StaticPermissionEvaluator;
use mesh_gateway::config::{Grant, SelectionMode};
use mesh_gateway::context::{CallerIdentity, UserRole};
use mesh_gateway::errors::GatewayError;
use mesh_gateway::jsonrpc::{JSONRPCRequest, INVALID_PARAMS, METHOD_NOT_FOUND};
use mesh_gateway::service::handler::{DispatchOutcome, GatewayHandler};
use mesh_gateway::types::{CallToolRequestParam, Content, RequestId};
use mesh_gateway::vmcp::strategy::strategy_for;
use mesh_gateway::vmcp::VirtualMcpServer;

use common::*;

fn passthrough() -> Arc<dyn mesh_gateway::vmcp::strategy::ToolStrategy> {
    strategy_for(mesh_gateway::config::StrategyKind::Passthrough)
}

fn user_identity(user: &str) -> CallerIdentity {
    CallerIdentity::UserSession {
        user_id: user.into(),
        role: UserRole::User,
    }
}

#[tokio::test]
async fn denied_call_is_semantic_error_without_upstream_io() {
    let up = MockServer::start().await;
    mock_tools_list(&up, vec![tool("t")]).await;

    let org = "org-denied";
    register(&connection("denied-c1", org, "One", &up.uri()));

    let session = session(org, user_identity("pleb"));
    // evaluator with no grants at all
    let ctx = Arc::new(
        mesh_gateway::context::RequestContext::new(
            Some(org.to_string()),
            user_identity("pleb"),
        )
        .with_permissions(StaticPermissionEvaluator::from_grants(&[]))
        .with_tracer(session.tracer.clone())
        .with_audit(session.audit.clone()),
    );

    let entity = entity(org, SelectionMode::Inclusion, vec![member("denied-c1")]);
    let server = VirtualMcpServer::assemble(entity, &ctx, &signer(), passthrough());

    let result = server
        .call_tool(CallToolRequestParam {
            name: "t".into(),
            arguments: Some(json!({})),
        })
        .await
        .unwrap();

    assert_eq!(result.is_error, Some(true));
    match &result.content[0] {
        Content::Text(text) => {
            assert_eq!(text.text, "Authorization failed: Access denied to: t")
        }
        other => panic!("unexpected content: {other:?}"),
    }

    // monitoring saw the denial
    let events = session.audit.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_error);
    assert_eq!(
        events[0].error_message.as_deref(),
        Some("Authorization failed: Access denied to: t")
    );

    // no upstream leg ran: no span, and the only upstream request was the
    // earlier tools/list none (listing was never forced here either)
    assert!(session.tracer.spans_named("mcp.proxy.callTool").is_empty());
    let calls = up
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|req| {
            serde_json::from_slice::<serde_json::Value>(&req.body)
                .ok()
                .and_then(|v| v.get("method").cloned())
                == Some(json!("tools/call"))
        })
        .count();
    assert_eq!(calls, 0);

    server.release();
}

#[tokio::test]
async fn granted_user_reaches_upstream() {
    let up = MockServer::start().await;
    mock_tools_list(&up, vec![tool("t")]).await;
    mock_tool_call(&up, "t", json!({"content": [{"type": "text", "text": "ok"}]})).await;

    let org = "org-granted";
    register(&connection("granted-c1", org, "One", &up.uri()));

    let session = session(org, user_identity("worker"));
    let ctx = Arc::new(
        mesh_gateway::context::RequestContext::new(
            Some(org.to_string()),
            user_identity("worker"),
        )
        .with_permissions(StaticPermissionEvaluator::from_grants(&[Grant {
            user_id: "worker".into(),
            connection_id: "granted-c1".into(),
            tools: vec!["t".into()],
        }]))
        .with_tracer(session.tracer.clone())
        .with_audit(session.audit.clone()),
    );

    let entity = entity(org, SelectionMode::Inclusion, vec![member("granted-c1")]);
    let server = VirtualMcpServer::assemble(entity, &ctx, &signer(), passthrough());

    let result = server
        .call_tool(CallToolRequestParam {
            name: "t".into(),
            arguments: Some(json!({})),
        })
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(false));
    assert_eq!(session.tracer.spans_named("mcp.proxy.callTool").len(), 1);

    server.release();
}

#[tokio::test]
async fn aggregated_call_result_matches_direct_upstream_payload() {
    let payload = json!({
        "content": [
            {"type": "text", "text": "result body"},
            {"type": "image", "data": "QUJD", "mimeType": "image/png"}
        ],
        "structuredContent": {"rows": [1, 2, 3]},
        "isError": false
    });

    let up = MockServer::start().await;
    mock_tools_list(&up, vec![tool("report")]).await;
    mock_tool_call(&up, "report", payload.clone()).await;

    let org = "org-roundtrip";
    register(&connection("rt-c1", org, "One", &up.uri()));

    let session = session(org, admin_identity());
    let entity = entity(org, SelectionMode::Inclusion, vec![member("rt-c1")]);
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    let result = server
        .call_tool(CallToolRequestParam {
            name: "report".into(),
            arguments: Some(json!({"q": 1})),
        })
        .await
        .unwrap();

    assert_eq!(serde_json::to_value(result).unwrap(), payload);

    server.release();
}

#[tokio::test]
async fn ten_concurrent_calls_share_one_delegation_token() {
    let up = MockServer::start().await;
    mock_tools_list(&up, vec![tool("t")]).await;
    mock_tool_call(&up, "t", json!({"content": [{"type": "text", "text": "ok"}]})).await;

    let org = "org-once";
    register(&connection("once-c1", org, "One", &up.uri()));

    let session = session(org, admin_identity());
    let entity = entity(org, SelectionMode::Inclusion, vec![member("once-c1")]);
    let server = Arc::new(VirtualMcpServer::assemble(
        entity,
        &session.ctx,
        &signer(),
        passthrough(),
    ));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let server = server.clone();
        handles.push(tokio::spawn(async move {
            server
                .call_tool(CallToolRequestParam {
                    name: "t".into(),
                    arguments: Some(json!({})),
                })
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // every upstream request carried the same token; the token embeds a
    // random jti, so equality proves issuance happened exactly once
    let tokens: Vec<String> = up
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter_map(|req| {
            req.headers
                .get("x-mesh-token")
                .map(|value| value.to_str().unwrap_or_default().to_string())
        })
        .collect();
    assert_eq!(tokens.len(), 10 + 1); // ten calls plus the forced listing
    assert!(tokens.windows(2).all(|pair| pair[0] == pair[1]));

    server.release();
}

#[tokio::test]
async fn streaming_body_flows_fully_while_capture_is_capped() {
    let big_body = vec![b'z'; 300 * 1024];
    let up = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call-tool/stream_tool"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/plain")
                .set_body_bytes(big_body.clone()),
        )
        .mount(&up)
        .await;
    mock_tools_list(&up, vec![tool("stream_tool")]).await;

    let org = "org-streaming";
    register(&connection("stream-c1", org, "One", &up.uri()));

    let session = session(org, admin_identity());
    let entity = entity(org, SelectionMode::Inclusion, vec![member("stream-c1")]);
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    let response = server
        .call_streamable_tool("stream_tool", Some(json!({})))
        .await
        .unwrap();
    let (status, body) = response.collect().await.unwrap();
    assert_eq!(status.as_u16(), 200);
    assert_eq!(body.len(), 300 * 1024);

    let events = session.audit.events();
    assert_eq!(events.len(), 1);
    assert!(!events[0].is_error);
    assert_eq!(
        events[0].error_message.as_deref(),
        Some("Response body truncated to 262144 bytes")
    );

    server.release();
}

#[tokio::test]
async fn streaming_denial_is_a_forbidden_json_response() {
    let up = MockServer::start().await;
    mock_tools_list(&up, vec![tool("stream_tool")]).await;

    let org = "org-stream-denied";
    register(&connection("sdenied-c1", org, "One", &up.uri()));

    let ctx = Arc::new(
        mesh_gateway::context::RequestContext::new(
            Some(org.to_string()),
            user_identity("pleb"),
        )
        .with_permissions(StaticPermissionEvaluator::from_grants(&[])),
    );

    let entity = entity(org, SelectionMode::Inclusion, vec![member("sdenied-c1")]);
    let server = VirtualMcpServer::assemble(entity, &ctx, &signer(), passthrough());

    let response = server
        .call_streamable_tool("stream_tool", Some(json!({})))
        .await
        .unwrap();
    let (status, body) = response.collect().await.unwrap();
    assert_eq!(status.as_u16(), 403);
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        parsed.get("error").and_then(|v| v.as_str()),
        Some("Authorization failed: Access denied to: stream_tool")
    );

    server.release();
}

#[tokio::test]
async fn direct_entity_enforces_tenant_and_status() {
    let org_a = "org-direct-a";
    let org_b = "org-direct-b";
    register(&connection(
        "direct-b1",
        org_b,
        "Foreign",
        "http://127.0.0.1:9000/mcp",
    ));
    let mut inactive = (*connection(
        "direct-a1",
        org_a,
        "Sleeping",
        "http://127.0.0.1:9000/mcp",
    ))
    .clone();
    inactive.status = mesh_gateway::config::EntityStatus::Inactive;
    register(&Arc::new(inactive));

    let handler = GatewayHandler::new(
        signer(),
        StaticPermissionEvaluator::from_grants(&[]),
        mesh_gateway::monitor::tracer::RecordingTracer::new(),
        mesh_gateway::monitor::event::MemoryAuditSink::new(),
        "http://gateway.test".into(),
    );

    // cross-tenant: reported as not-found, no tenant-specific text
    let err = handler.direct_entity("direct-b1", Some(org_a)).unwrap_err();
    assert_eq!(err.status_code().as_u16(), 404);
    assert_eq!(err.to_string(), "Connection not found");

    // unknown id
    let err = handler.direct_entity("direct-none", Some(org_a)).unwrap_err();
    assert!(matches!(err, GatewayError::ConnectionNotFound));

    // inactive
    let err = handler.direct_entity("direct-a1", Some(org_a)).unwrap_err();
    assert_eq!(err.status_code().as_u16(), 503);
}

fn test_handler() -> GatewayHandler {
    GatewayHandler::new(
        signer(),
        StaticPermissionEvaluator::from_grants(&[]),
        mesh_gateway::monitor::tracer::RecordingTracer::new(),
        mesh_gateway::monitor::event::MemoryAuditSink::new(),
        "http://gateway.test".into(),
    )
}

#[tokio::test]
async fn unknown_method_answers_with_method_not_found() {
    let org = "org-rpc-unknown";
    let session = session(org, admin_identity());
    let entity = entity(org, SelectionMode::Inclusion, vec![]);
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    let request = JSONRPCRequest::new(RequestId::Integer(7), "bogus/method", None);
    match test_handler()
        .dispatch(&server, &request, "2025-03-26")
        .await
        .unwrap()
    {
        DispatchOutcome::Error(error) => {
            assert_eq!(error.error.code, METHOD_NOT_FOUND);
            assert_eq!(error.id, Some(RequestId::Integer(7)));
            assert_eq!(error.error.message, "Method not found: bogus/method");
        }
        _ => panic!("expected a JSON-RPC error outcome"),
    }

    server.release();
}

#[tokio::test]
async fn malformed_call_params_answer_with_invalid_params() {
    let org = "org-rpc-params";
    let session = session(org, admin_identity());
    let entity = entity(org, SelectionMode::Inclusion, vec![]);
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    // params is a bare number, not a tool-call object
    let request = JSONRPCRequest::new(RequestId::Integer(8), "tools/call", Some(json!(42)));
    match test_handler()
        .dispatch(&server, &request, "2025-03-26")
        .await
        .unwrap()
    {
        DispatchOutcome::Error(error) => {
            assert_eq!(error.error.code, INVALID_PARAMS);
            assert_eq!(error.id, Some(RequestId::Integer(8)));
        }
        _ => panic!("expected a JSON-RPC error outcome"),
    }

    server.release();
}

#[tokio::test]
async fn release_is_exactly_once_per_proxy_and_idempotent() {
    let up = MockServer::start().await;
    mock_tools_list(&up, vec![tool("t")]).await;

    let org = "org-release";
    register(&connection("release-c1", org, "One", &up.uri()));

    let session = session(org, admin_identity());
    let entity = entity(org, SelectionMode::Inclusion, vec![member("release-c1")]);
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    server.list_tools().await;
    server.release();
    // double release stays quiet; the drop backstop after this is a no-op
    server.release();
}
