use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use http::StatusCode;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::{
    config::SelectionMode,
    errors::GatewayError,
    proxy::{ProxyCollection, StreamableResponse},
    types::{CallToolRequestParam, CallToolResult, Tool},
    vmcp::strategy::{BaseToolCaller, StrategyContext, ToolStrategy, ToolWithConnection},
};

/// Where an aggregated tool name routes: the owning connection and the
/// name the upstream knows it by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRoute {
    pub connection_id: String,
    pub original_name: String,
}

/// What happens when two connections publish the same tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// First occurrence in collection order wins; later duplicates are
    /// dropped.
    FirstWins,
    /// Later duplicates stay visible under `connection_id::tool_name`.
    PrefixOnConflict,
}

/// Applies a member's selection list to one item name. An absent or empty
/// list passes everything; whole-connection drops were already resolved
/// during assembly.
pub(crate) fn selection_allows(
    mode: SelectionMode,
    list: &Option<Vec<String>>,
    name: &str,
) -> bool {
    match list {
        None => true,
        Some(selected) if selected.is_empty() => true,
        Some(selected) => match mode {
            SelectionMode::Inclusion => selected.iter().any(|s| s == name),
            SelectionMode::Exclusion => !selected.iter().any(|s| s == name),
        },
    }
}

struct AggregatedTools {
    ctx: StrategyContext,
    visible: Vec<Tool>,
    routes: HashMap<String, ToolRoute>,
}

/// Merges tools across the collection, owns the route map, and hands the
/// annotated list to the presentation strategy. Built lazily on first
/// listing or call and cached for the aggregator's lifetime.
pub struct ToolAggregator {
    collection: Arc<ProxyCollection>,
    mode: SelectionMode,
    strategy: Arc<dyn ToolStrategy>,
    conflict: ConflictPolicy,
    cache: OnceCell<AggregatedTools>,
}

struct RouteBase<'a> {
    routes: &'a HashMap<String, ToolRoute>,
    collection: &'a ProxyCollection,
}

#[async_trait]
impl BaseToolCaller for RouteBase<'_> {
    async fn call(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, GatewayError> {
        match self.routes.get(name) {
            Some(route) => match self.collection.get(&route.connection_id) {
                Some(entry) => entry.proxy.call_tool(&route.original_name, arguments).await,
                None => Ok(CallToolResult::text_error(format!("Tool not found: {name}"))),
            },
            None => Ok(CallToolResult::text_error(format!("Tool not found: {name}"))),
        }
    }
}

impl ToolAggregator {
    pub fn new(
        collection: Arc<ProxyCollection>,
        mode: SelectionMode,
        strategy: Arc<dyn ToolStrategy>,
        conflict: ConflictPolicy,
    ) -> Self {
        Self {
            collection,
            mode,
            strategy,
            conflict,
            cache: OnceCell::new(),
        }
    }

    /// The externally visible tool list.
    pub async fn list(&self) -> Vec<Tool> {
        self.ensure().await.visible.clone()
    }

    /// Routes a call by aggregated name; names the route map does not
    /// know go to the strategy (meta-tools). A miss on both sides yields
    /// the not-found result, never an error.
    pub async fn call(&self, params: CallToolRequestParam) -> Result<CallToolResult, GatewayError> {
        let aggregated = self.ensure().await;
        let base = RouteBase {
            routes: &aggregated.routes,
            collection: &self.collection,
        };
        match aggregated.routes.get(&params.name) {
            Some(route) => match self.collection.get(&route.connection_id) {
                Some(entry) => {
                    entry
                        .proxy
                        .call_tool(&route.original_name, params.arguments)
                        .await
                }
                None => Ok(CallToolResult::text_error(format!(
                    "Tool not found: {}",
                    params.name
                ))),
            },
            None => {
                self.strategy
                    .call_meta(&params.name, params.arguments, &aggregated.ctx, &base)
                    .await
            }
        }
    }

    /// Streaming twin of [`call`]: routed tools stream straight from the
    /// upstream; meta-tool results are wrapped as a single JSON document.
    pub async fn call_streamable(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<StreamableResponse, GatewayError> {
        let aggregated = self.ensure().await;
        match aggregated.routes.get(name) {
            Some(route) => match self.collection.get(&route.connection_id) {
                Some(entry) => {
                    entry
                        .proxy
                        .call_streamable(&route.original_name, arguments)
                        .await
                }
                None => Ok(StreamableResponse::json(
                    StatusCode::OK,
                    &serde_json::to_value(CallToolResult::text_error(format!(
                        "Tool not found: {name}"
                    )))
                    .unwrap_or_default(),
                )),
            },
            None => {
                let base = RouteBase {
                    routes: &aggregated.routes,
                    collection: &self.collection,
                };
                let result = self
                    .strategy
                    .call_meta(name, arguments, &aggregated.ctx, &base)
                    .await?;
                Ok(StreamableResponse::json(
                    StatusCode::OK,
                    &serde_json::to_value(result).unwrap_or_default(),
                ))
            }
        }
    }

    /// Route map entry for an aggregated name, if any.
    pub async fn route_for(&self, name: &str) -> Option<ToolRoute> {
        self.ensure().await.routes.get(name).cloned()
    }

    async fn ensure(&self) -> &AggregatedTools {
        self.cache.get_or_init(|| self.aggregate()).await
    }

    /// Fans out `tools/list` over the collection, filters by selection,
    /// merges in collection order with positional first-wins dedup, and
    /// runs the presentation strategy over the survivors.
    async fn aggregate(&self) -> AggregatedTools {
        let entries = self.collection.entries();
        let listings = join_all(entries.iter().map(|entry| async move {
            match entry.proxy.list_tools().await {
                Ok(tools) => Some(tools),
                Err(e) => {
                    log::warn!(
                        "[virtual-mcp] tools/list failed for {}: {e}",
                        entry.connection.id
                    );
                    None
                }
            }
        }))
        .await;

        let mut annotated: Vec<ToolWithConnection> = Vec::new();
        let mut routes: HashMap<String, ToolRoute> = HashMap::new();

        for (entry, listing) in entries.iter().zip(listings) {
            let Some(tools) = listing else { continue };
            for tool in tools {
                if !selection_allows(self.mode, &entry.selected_tools, &tool.name) {
                    continue;
                }

                let final_name = if routes.contains_key(&tool.name) {
                    match self.conflict {
                        ConflictPolicy::FirstWins => continue,
                        ConflictPolicy::PrefixOnConflict => {
                            format!("{}::{}", entry.connection.id, tool.name)
                        }
                    }
                } else {
                    tool.name.clone()
                };
                if routes.contains_key(&final_name) {
                    continue;
                }

                routes.insert(
                    final_name.clone(),
                    ToolRoute {
                        connection_id: entry.connection.id.clone(),
                        original_name: tool.name.clone(),
                    },
                );
                let mut visible_tool = tool;
                visible_tool.name = final_name;
                annotated.push(ToolWithConnection {
                    tool: visible_tool,
                    connection_id: entry.connection.id.clone(),
                    connection_title: entry.connection.title.clone(),
                });
            }
        }

        let ctx = StrategyContext::new(annotated);
        let visible = self.strategy.present(&ctx);
        AggregatedTools {
            ctx,
            visible,
            routes,
        }
    }
}
