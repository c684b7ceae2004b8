use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    config::StrategyKind,
    errors::GatewayError,
    types::{CallToolResult, Tool},
};

/// A tool annotated with its owning connection, as handed to strategies.
#[derive(Debug, Clone)]
pub struct ToolWithConnection {
    pub tool: Tool,
    pub connection_id: String,
    pub connection_title: String,
}

/// Input to a presentation strategy: the merged tool list and the
/// category names (connection titles) it spans. Strategies are pure with
/// respect to this context; per-request state belongs to the aggregator.
pub struct StrategyContext {
    pub tools: Vec<ToolWithConnection>,
    pub categories: Vec<String>,
}

impl StrategyContext {
    pub fn new(tools: Vec<ToolWithConnection>) -> Self {
        let mut categories = Vec::new();
        for tool in &tools {
            if !categories.contains(&tool.connection_title) {
                categories.push(tool.connection_title.clone());
            }
        }
        Self { tools, categories }
    }
}

/// Routes a tool call to its owning upstream by aggregated name. Handed
/// to strategies so meta-tools can reach real tools.
#[async_trait]
pub trait BaseToolCaller: Send + Sync {
    async fn call(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, GatewayError>;
}

/// Transforms the aggregated tool list into the externally visible one
/// and answers calls to the meta-tools it owns.
#[async_trait]
pub trait ToolStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// The externally visible tool list.
    fn present(&self, ctx: &StrategyContext) -> Vec<Tool>;

    /// Handles a call that did not match the route map. Unknown names
    /// yield the not-found result rather than an error.
    async fn call_meta(
        &self,
        name: &str,
        arguments: Option<Value>,
        ctx: &StrategyContext,
        base: &dyn BaseToolCaller,
    ) -> Result<CallToolResult, GatewayError>;
}

/// Closed-set strategy registry. Unknown kinds were already collapsed to
/// passthrough when the mode string was parsed.
pub fn strategy_for(kind: StrategyKind) -> Arc<dyn ToolStrategy> {
    match kind {
        StrategyKind::Passthrough => Arc::new(PassthroughStrategy),
        StrategyKind::Smart => Arc::new(SmartStrategy),
    }
}

/// Identity presentation: every aggregated tool is visible under its own
/// name and calls route straight through.
pub struct PassthroughStrategy;

#[async_trait]
impl ToolStrategy for PassthroughStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Passthrough
    }

    fn present(&self, ctx: &StrategyContext) -> Vec<Tool> {
        ctx.tools.iter().map(|entry| entry.tool.clone()).collect()
    }

    async fn call_meta(
        &self,
        name: &str,
        _arguments: Option<Value>,
        _ctx: &StrategyContext,
        _base: &dyn BaseToolCaller,
    ) -> Result<CallToolResult, GatewayError> {
        Ok(CallToolResult::text_error(format!("Tool not found: {name}")))
    }
}

pub const META_LIST_CATEGORIES: &str = "list_tool_categories";
pub const META_FIND_TOOLS: &str = "find_tools";
pub const META_CALL_TOOL: &str = "call_tool";

/// Indirect presentation: a small set of meta-tools through which the
/// model discovers and invokes the underlying tools by name. Keeps the
/// visible surface constant no matter how many upstreams are aggregated.
pub struct SmartStrategy;

impl SmartStrategy {
    fn meta_tools() -> Vec<Tool> {
        vec![
            Tool {
                name: META_LIST_CATEGORIES.to_string(),
                description: Some(
                    "List the available tool categories and how many tools each offers."
                        .to_string(),
                ),
                input_schema: json!({"type": "object", "properties": {}}),
                extra: Default::default(),
            },
            Tool {
                name: META_FIND_TOOLS.to_string(),
                description: Some(
                    "Find tools by category and/or free-text query; returns names, \
                     descriptions and input schemas."
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "category": {"type": "string", "description": "Restrict to one category"},
                        "query": {"type": "string", "description": "Substring matched against name and description"}
                    }
                }),
                extra: Default::default(),
            },
            Tool {
                name: META_CALL_TOOL.to_string(),
                description: Some(
                    "Invoke a tool previously discovered with find_tools by its exact name."
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "arguments": {"type": "object"}
                    },
                    "required": ["name"]
                }),
                extra: Default::default(),
            },
        ]
    }

    fn list_categories(ctx: &StrategyContext) -> CallToolResult {
        let categories: Vec<Value> = ctx
            .categories
            .iter()
            .map(|category| {
                let count = ctx
                    .tools
                    .iter()
                    .filter(|tool| &tool.connection_title == category)
                    .count();
                json!({"name": category, "toolCount": count})
            })
            .collect();
        let structured = json!({"categories": categories});
        CallToolResult {
            content: vec![crate::types::Content::Text(crate::types::TextContent {
                text: structured.to_string(),
                annotations: None,
            })],
            structured_content: Some(structured),
            is_error: Some(false),
        }
    }

    fn find_tools(ctx: &StrategyContext, arguments: Option<&Value>) -> CallToolResult {
        let category = arguments
            .and_then(|args| args.get("category"))
            .and_then(Value::as_str);
        let query = arguments
            .and_then(|args| args.get("query"))
            .and_then(Value::as_str)
            .map(str::to_lowercase);

        let matches: Vec<Value> = ctx
            .tools
            .iter()
            .filter(|entry| category.is_none_or(|c| entry.connection_title == c))
            .filter(|entry| {
                query.as_deref().is_none_or(|q| {
                    entry.tool.name.to_lowercase().contains(q)
                        || entry
                            .tool
                            .description
                            .as_deref()
                            .is_some_and(|d| d.to_lowercase().contains(q))
                })
            })
            .map(|entry| {
                json!({
                    "name": entry.tool.name,
                    "description": entry.tool.description,
                    "inputSchema": entry.tool.input_schema,
                    "category": entry.connection_title,
                })
            })
            .collect();
        let structured = json!({"tools": matches});
        CallToolResult {
            content: vec![crate::types::Content::Text(crate::types::TextContent {
                text: structured.to_string(),
                annotations: None,
            })],
            structured_content: Some(structured),
            is_error: Some(false),
        }
    }
}

#[async_trait]
impl ToolStrategy for SmartStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Smart
    }

    fn present(&self, _ctx: &StrategyContext) -> Vec<Tool> {
        Self::meta_tools()
    }

    async fn call_meta(
        &self,
        name: &str,
        arguments: Option<Value>,
        ctx: &StrategyContext,
        base: &dyn BaseToolCaller,
    ) -> Result<CallToolResult, GatewayError> {
        match name {
            META_LIST_CATEGORIES => Ok(Self::list_categories(ctx)),
            META_FIND_TOOLS => Ok(Self::find_tools(ctx, arguments.as_ref())),
            META_CALL_TOOL => {
                let Some(args) = arguments else {
                    return Ok(CallToolResult::text_error("call_tool requires a name"));
                };
                let Some(target) = args.get("name").and_then(Value::as_str) else {
                    return Ok(CallToolResult::text_error("call_tool requires a name"));
                };
                base.call(target, args.get("arguments").cloned()).await
            }
            _ => Ok(CallToolResult::text_error(format!("Tool not found: {name}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotated(name: &str, title: &str) -> ToolWithConnection {
        ToolWithConnection {
            tool: Tool {
                name: name.into(),
                description: Some(format!("{name} description")),
                input_schema: json!({"type": "object"}),
                extra: Default::default(),
            },
            connection_id: format!("conn-{title}"),
            connection_title: title.into(),
        }
    }

    struct EchoBase;

    #[async_trait]
    impl BaseToolCaller for EchoBase {
        async fn call(
            &self,
            name: &str,
            _arguments: Option<Value>,
        ) -> Result<CallToolResult, GatewayError> {
            Ok(CallToolResult::text(format!("called {name}")))
        }
    }

    #[test]
    fn passthrough_presents_tools_unchanged() {
        let ctx = StrategyContext::new(vec![annotated("a", "One"), annotated("b", "Two")]);
        let visible = PassthroughStrategy.present(&ctx);
        let names: Vec<&str> = visible.iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn categories_come_from_connection_titles_in_order() {
        let ctx = StrategyContext::new(vec![
            annotated("a", "One"),
            annotated("b", "Two"),
            annotated("c", "One"),
        ]);
        assert_eq!(ctx.categories, vec!["One", "Two"]);
    }

    #[test]
    fn smart_presents_fixed_meta_surface() {
        let ctx = StrategyContext::new(vec![annotated("a", "One")]);
        let names: Vec<String> = SmartStrategy
            .present(&ctx)
            .into_iter()
            .map(|tool| tool.name)
            .collect();
        assert_eq!(
            names,
            vec![META_LIST_CATEGORIES, META_FIND_TOOLS, META_CALL_TOOL]
        );
    }

    #[tokio::test]
    async fn smart_find_tools_filters_by_category_and_query() {
        let ctx = StrategyContext::new(vec![
            annotated("search_files", "Files"),
            annotated("search_mail", "Mail"),
            annotated("delete_mail", "Mail"),
        ]);
        let result = SmartStrategy
            .call_meta(
                META_FIND_TOOLS,
                Some(json!({"category": "Mail", "query": "search"})),
                &ctx,
                &EchoBase,
            )
            .await
            .unwrap();
        let structured = result.structured_content.unwrap();
        let tools = structured.get("tools").unwrap().as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].get("name").unwrap(), "search_mail");
    }

    #[tokio::test]
    async fn smart_call_tool_delegates_to_base() {
        let ctx = StrategyContext::new(vec![annotated("a", "One")]);
        let result = SmartStrategy
            .call_meta(
                META_CALL_TOOL,
                Some(json!({"name": "a", "arguments": {}})),
                &ctx,
                &EchoBase,
            )
            .await
            .unwrap();
        match &result.content[0] {
            crate::types::Content::Text(text) => assert_eq!(text.text, "called a"),
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_meta_name_is_tool_not_found() {
        let ctx = StrategyContext::new(vec![]);
        let result = SmartStrategy
            .call_meta("nope", None, &ctx, &EchoBase)
            .await
            .unwrap();
        assert_eq!(result.first_error_text(), Some("Tool not found: nope"));
    }
}
