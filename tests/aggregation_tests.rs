mod common;

use serde_json::json;
use wiremock::MockServer;

use mesh_gateway::config::SelectionMode;
use mesh_gateway::errors::GatewayError;
use mesh_gateway::types::{CallToolRequestParam, Content, ServerCapabilities, Tool};
use mesh_gateway::vmcp::strategy::strategy_for;
use mesh_gateway::vmcp::VirtualMcpServer;

use common::*;

fn passthrough() -> std::sync::Arc<dyn mesh_gateway::vmcp::strategy::ToolStrategy> {
    strategy_for(mesh_gateway::config::StrategyKind::Passthrough)
}

#[tokio::test]
async fn first_wins_dedup_across_connections() {
    let up1 = MockServer::start().await;
    let up2 = MockServer::start().await;
    mock_tools_list(&up1, vec![tool("search"), tool("read")]).await;
    mock_tools_list(&up2, vec![tool("search"), tool("ping")]).await;
    mock_tool_call(&up1, "search", json!({"content": [{"type": "text", "text": "from-c1"}]}))
        .await;

    let org = "org-dedup";
    let c1 = connection("dedup-c1", org, "One", &up1.uri());
    let c2 = connection("dedup-c2", org, "Two", &up2.uri());
    register(&c1);
    register(&c2);

    let session = session(org, admin_identity());
    let entity = entity(
        org,
        SelectionMode::Inclusion,
        vec![member("dedup-c1"), member("dedup-c2")],
    );
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    let listing = server.list_tools().await;
    let names: Vec<&str> = listing.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["search", "read", "ping"]);

    // the shared name routes to the first connection in collection order
    let result = server
        .call_tool(CallToolRequestParam {
            name: "search".into(),
            arguments: Some(json!({})),
        })
        .await
        .unwrap();
    match &result.content[0] {
        Content::Text(text) => assert_eq!(text.text, "from-c1"),
        other => panic!("unexpected content: {other:?}"),
    }

    server.release();
}

#[tokio::test]
async fn exclusion_mode_drops_connection_with_empty_selection() {
    let up = MockServer::start().await;
    mock_tools_list(&up, vec![tool("t")]).await;

    let org = "org-excl-drop";
    for id in ["excl-c1", "excl-c2", "excl-c3"] {
        register(&connection(id, org, id, &up.uri()));
    }

    let session = session(org, admin_identity());
    let mut dropped = member("excl-c2");
    dropped.selected_tools = Some(vec![]);
    let entity = entity(org, SelectionMode::Exclusion, vec![dropped]);
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    let collection_ids: Vec<String> = server
        .collection()
        .entries()
        .iter()
        .map(|entry| entry.connection.id.clone())
        .collect();
    assert_eq!(collection_ids, vec!["excl-c1", "excl-c3"]);

    server.release();
}

#[tokio::test]
async fn exclusion_selection_subtracts_tools() {
    let up = MockServer::start().await;
    mock_tools_list(&up, vec![tool("t1"), tool("t2"), tool("t3")]).await;

    let org = "org-excl-tools";
    register(&connection("excl-tools-c1", org, "One", &up.uri()));

    let session = session(org, admin_identity());
    let mut restricted = member("excl-tools-c1");
    restricted.selected_tools = Some(vec!["t1".into()]);
    let entity = entity(org, SelectionMode::Exclusion, vec![restricted]);
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    let names: Vec<String> = server
        .list_tools()
        .await
        .tools
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["t2", "t3"]);

    server.release();
}

#[tokio::test]
async fn inclusion_selection_is_a_subset_of_the_list() {
    let up = MockServer::start().await;
    mock_tools_list(&up, vec![tool("t1"), tool("t3")]).await;

    let org = "org-incl-tools";
    register(&connection("incl-tools-c1", org, "One", &up.uri()));

    let session = session(org, admin_identity());
    let mut restricted = member("incl-tools-c1");
    restricted.selected_tools = Some(vec!["t1".into(), "t2".into()]);
    let entity = entity(org, SelectionMode::Inclusion, vec![restricted]);
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    let names: Vec<String> = server
        .list_tools()
        .await
        .tools
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["t1"]);

    server.release();
}

#[tokio::test]
async fn zero_member_surface_is_empty_and_calls_miss() {
    let org = "org-empty";
    let session = session(org, admin_identity());
    let entity = entity(org, SelectionMode::Inclusion, vec![]);
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    assert!(server.list_tools().await.tools.is_empty());
    assert!(server.list_resources().await.resources.is_empty());
    assert!(server.list_prompts().await.prompts.is_empty());
    assert!(server
        .list_resource_templates()
        .await
        .resource_templates
        .is_empty());

    let result = server
        .call_tool(CallToolRequestParam {
            name: "anything".into(),
            arguments: None,
        })
        .await
        .unwrap();
    assert_eq!(result.first_error_text(), Some("Tool not found: anything"));

    server.release();
}

#[tokio::test]
async fn cached_tool_index_answers_without_upstream_io() {
    // no tools/list mock mounted: any upstream call would 404 and the
    // listing would come back empty
    let up = MockServer::start().await;

    let org = "org-cached";
    let mut conn = (*connection("cached-c1", org, "Cached", &up.uri())).clone();
    conn.tool_index = Some(vec![Tool {
        name: "indexed".into(),
        description: None,
        input_schema: json!({"type": "object"}),
        extra: Default::default(),
    }]);
    let conn = std::sync::Arc::new(conn);
    register(&conn);

    let session = session(org, admin_identity());
    let entity = entity(org, SelectionMode::Inclusion, vec![member("cached-c1")]);
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    let names: Vec<String> = server
        .list_tools()
        .await
        .tools
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["indexed"]);
    assert!(up.received_requests().await.unwrap().is_empty());

    server.release();
}

#[tokio::test]
async fn missing_resources_capability_skips_the_network() {
    let up = MockServer::start().await;
    mock_tools_list(&up, vec![]).await;

    let org = "org-caps";
    let mut conn = (*connection("caps-c1", org, "NoRes", &up.uri())).clone();
    conn.capabilities = Some(ServerCapabilities {
        prompts: None,
        resources: None,
        tools: Some(Default::default()),
    });
    let conn = std::sync::Arc::new(conn);
    register(&conn);

    let session = session(org, admin_identity());
    let entity = entity(org, SelectionMode::Inclusion, vec![member("caps-c1")]);
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    assert!(server.list_resources().await.resources.is_empty());
    let requests = up.received_requests().await.unwrap();
    assert!(requests.is_empty());

    server.release();
}

#[tokio::test]
async fn resource_reads_route_by_uri_and_misses_are_not_found() {
    let up = MockServer::start().await;
    mock_rpc_method(
        &up,
        "resources/list",
        json!({"resources": [{"uri": "file:///a.txt", "name": "a"}]}),
    )
    .await;
    mock_rpc_method(
        &up,
        "resources/read",
        json!({"contents": [{"uri": "file:///a.txt", "text": "hello"}]}),
    )
    .await;

    let org = "org-res";
    register(&connection("res-c1", org, "Files", &up.uri()));

    let session = session(org, admin_identity());
    let entity = entity(org, SelectionMode::Inclusion, vec![member("res-c1")]);
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    let listing = server.list_resources().await;
    assert_eq!(listing.resources[0].uri, "file:///a.txt");

    let contents = server
        .read_resource(mesh_gateway::types::ReadResourceRequestParam {
            uri: "file:///a.txt".into(),
        })
        .await
        .unwrap();
    assert_eq!(contents.contents.len(), 1);

    let err = server
        .read_resource(mesh_gateway::types::ReadResourceRequestParam {
            uri: "file:///missing.txt".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ResourceNotFound(_)));

    server.release();
}

#[tokio::test]
async fn prompts_dedup_first_wins_and_route_by_name() {
    let up1 = MockServer::start().await;
    let up2 = MockServer::start().await;
    mock_rpc_method(
        &up1,
        "prompts/list",
        json!({"prompts": [{"name": "greet", "description": "one"}]}),
    )
    .await;
    mock_rpc_method(
        &up2,
        "prompts/list",
        json!({"prompts": [{"name": "greet", "description": "two"}, {"name": "farewell"}]}),
    )
    .await;
    mock_rpc_method(
        &up1,
        "prompts/get",
        json!({"messages": [{"role": "user", "content": {"type": "text", "text": "hi"}}]}),
    )
    .await;

    let org = "org-prompts";
    register(&connection("prompt-c1", org, "One", &up1.uri()));
    register(&connection("prompt-c2", org, "Two", &up2.uri()));

    let session = session(org, admin_identity());
    let entity = entity(
        org,
        SelectionMode::Inclusion,
        vec![member("prompt-c1"), member("prompt-c2")],
    );
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    let listing = server.list_prompts().await;
    let names: Vec<&str> = listing.prompts.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["greet", "farewell"]);
    assert_eq!(listing.prompts[0].description.as_deref(), Some("one"));

    let got = server
        .get_prompt(mesh_gateway::types::GetPromptRequestParam {
            name: "greet".into(),
            arguments: None,
        })
        .await
        .unwrap();
    assert_eq!(got.messages.len(), 1);

    let err = server
        .get_prompt(mesh_gateway::types::GetPromptRequestParam {
            name: "missing".into(),
            arguments: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::PromptNotFound(_)));

    server.release();
}

#[tokio::test]
async fn mesh_prefixes_only_colliding_tool_names() {
    let up1 = MockServer::start().await;
    let up2 = MockServer::start().await;
    mock_tools_list(&up1, vec![tool("search")]).await;
    mock_tools_list(&up2, vec![tool("search"), tool("ping")]).await;
    mock_tool_call(&up2, "search", json!({"content": [{"type": "text", "text": "from-c2"}]}))
        .await;

    let org = "org-mesh";
    register(&connection("mesh-c1", org, "One", &up1.uri()));
    register(&connection("mesh-c2", org, "Two", &up2.uri()));

    let session = session(org, admin_identity());
    let server = VirtualMcpServer::assemble_mesh(org, &session.ctx, &signer(), passthrough());

    let names: Vec<String> = server
        .list_tools()
        .await
        .tools
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["search", "mesh-c2::search", "ping"]);

    // the prefixed name reaches the second upstream under its original name
    let result = server
        .call_tool(CallToolRequestParam {
            name: "mesh-c2::search".into(),
            arguments: Some(json!({})),
        })
        .await
        .unwrap();
    match &result.content[0] {
        Content::Text(text) => assert_eq!(text.text, "from-c2"),
        other => panic!("unexpected content: {other:?}"),
    }

    server.release();
}

#[tokio::test]
async fn smart_strategy_surfaces_meta_tools_but_routes_direct_names() {
    let up = MockServer::start().await;
    mock_tools_list(&up, vec![tool("search")]).await;
    mock_tool_call(&up, "search", json!({"content": [{"type": "text", "text": "found"}]})).await;

    let org = "org-smart";
    register(&connection("smart-c1", org, "Library", &up.uri()));

    let session = session(org, admin_identity());
    let entity = entity(org, SelectionMode::Inclusion, vec![member("smart-c1")]);
    let server = VirtualMcpServer::assemble(
        entity,
        &session.ctx,
        &signer(),
        strategy_for(mesh_gateway::config::StrategyKind::Smart),
    );

    let names: Vec<String> = server
        .list_tools()
        .await
        .tools
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["list_tool_categories", "find_tools", "call_tool"]);

    // the meta call_tool reaches the underlying tool
    let result = server
        .call_tool(CallToolRequestParam {
            name: "call_tool".into(),
            arguments: Some(json!({"name": "search", "arguments": {}})),
        })
        .await
        .unwrap();
    match &result.content[0] {
        Content::Text(text) => assert_eq!(text.text, "found"),
        other => panic!("unexpected content: {other:?}"),
    }

    server.release();
}

#[tokio::test]
async fn self_referencing_virtual_connection_is_skipped_in_exclusion_mode() {
    let up = MockServer::start().await;
    mock_tools_list(&up, vec![tool("t")]).await;

    let org = "org-selfref";
    register(&connection("selfref-c1", org, "Real", &up.uri()));
    let mut cyclic = (*connection("selfref-c2", org, "Cycle", &up.uri())).clone();
    cyclic.connection_type = mesh_gateway::config::ConnectionType::Virtual;
    cyclic.virtual_mcp_id = Some(format!("vmcp-{org}"));
    register(&std::sync::Arc::new(cyclic));

    let session = session(org, admin_identity());
    let entity = entity(org, SelectionMode::Exclusion, vec![]);
    let server = VirtualMcpServer::assemble(entity, &session.ctx, &signer(), passthrough());

    let ids: Vec<String> = server
        .collection()
        .entries()
        .iter()
        .map(|entry| entry.connection.id.clone())
        .collect();
    assert_eq!(ids, vec!["selfref-c1"]);

    server.release();
}
