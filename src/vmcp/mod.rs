pub mod prompts;
pub mod resources;
pub mod strategy;
pub mod tools;

use std::sync::Arc;

use serde_json::Value;

use crate::{
    auth::delegation::DelegationSigner,
    config::{SelectionMode, VirtualMcp},
    context::RequestContext,
    errors::GatewayError,
    proxy::{CollectionMember, ProxyCollection, StreamableResponse},
    store,
    types::{
        CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult,
        ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
        PromptsCapability, ReadResourceRequestParam, ReadResourceResult, ResourcesCapability,
        ServerCapabilities, ToolsCapability,
    },
};

use prompts::PromptAggregator;
use resources::{ResourceAggregator, ResourceTemplateAggregator};
use strategy::ToolStrategy;
use tools::{ConflictPolicy, ToolAggregator};

/// One aggregated MCP surface over a collection of proxies: the virtual
/// MCP the client talks to for the duration of a session.
///
/// Assembled per client session, released by the front door when the
/// session scope ends.
pub struct VirtualMcpServer {
    entity: Arc<VirtualMcp>,
    collection: Arc<ProxyCollection>,
    tools: ToolAggregator,
    resources: ResourceAggregator,
    templates: ResourceTemplateAggregator,
    prompts: PromptAggregator,
}

impl VirtualMcpServer {
    /// Assembles the collection from the entity's member entries.
    ///
    /// Inclusion mode loads exactly the listed members; exclusion mode
    /// starts from every active connection in the tenant, drops members
    /// named with an all-empty selection, and skips virtual connections
    /// that point back at this same virtual MCP.
    pub fn assemble(
        entity: Arc<VirtualMcp>,
        ctx: &Arc<RequestContext>,
        signer: &Arc<DelegationSigner>,
        strategy: Arc<dyn ToolStrategy>,
    ) -> Self {
        Self::assemble_with_policy(entity, ctx, signer, strategy, ConflictPolicy::FirstWins)
    }

    /// Mesh variant: same assembly, but colliding tool names stay visible
    /// under a `connection_id::tool_name` prefix instead of being
    /// dropped.
    pub fn assemble_mesh(
        organization_id: &str,
        ctx: &Arc<RequestContext>,
        signer: &Arc<DelegationSigner>,
        strategy: Arc<dyn ToolStrategy>,
    ) -> Self {
        let mut entity = VirtualMcp::default_agent(organization_id);
        entity.id = format!("mesh-{organization_id}");
        entity.title = "Mesh".to_string();
        Self::assemble_with_policy(
            Arc::new(entity),
            ctx,
            signer,
            strategy,
            ConflictPolicy::PrefixOnConflict,
        )
    }

    fn assemble_with_policy(
        entity: Arc<VirtualMcp>,
        ctx: &Arc<RequestContext>,
        signer: &Arc<DelegationSigner>,
        strategy: Arc<dyn ToolStrategy>,
        conflict: ConflictPolicy,
    ) -> Self {
        let members = match entity.tool_selection_mode {
            SelectionMode::Inclusion => Self::inclusion_members(&entity),
            SelectionMode::Exclusion => Self::exclusion_members(&entity),
        };

        let collection = Arc::new(ProxyCollection::build(members, ctx, signer));
        let mode = entity.tool_selection_mode;

        Self {
            entity,
            collection: collection.clone(),
            tools: ToolAggregator::new(collection.clone(), mode, strategy, conflict),
            resources: ResourceAggregator::new(collection.clone(), mode),
            templates: ResourceTemplateAggregator::new(collection.clone()),
            prompts: PromptAggregator::new(collection, mode),
        }
    }

    fn inclusion_members(entity: &VirtualMcp) -> Vec<CollectionMember> {
        let mut members = Vec::with_capacity(entity.members.len());
        for member in &entity.members {
            let Some(connection) = store::connection_fetch(&member.connection_id) else {
                log::warn!(
                    "[virtual-mcp] member connection {} not found",
                    member.connection_id
                );
                continue;
            };
            if connection.organization_id != entity.organization_id {
                log::warn!(
                    "[virtual-mcp] member connection {} belongs to another tenant",
                    member.connection_id
                );
                continue;
            }
            if !connection.status.is_active() {
                continue;
            }
            if connection.virtual_mcp_id.as_deref() == Some(entity.id.as_str()) {
                log::warn!(
                    "[virtual-mcp] skipping self-referencing connection {}",
                    connection.id
                );
                continue;
            }
            members.push(CollectionMember {
                connection,
                selected_tools: member.selected_tools.clone(),
                selected_resources: member.selected_resources.clone(),
                selected_prompts: member.selected_prompts.clone(),
            });
        }
        members
    }

    fn exclusion_members(entity: &VirtualMcp) -> Vec<CollectionMember> {
        let mut members = Vec::new();
        for connection in store::connections_for_tenant(&entity.organization_id) {
            if !connection.status.is_active() {
                continue;
            }
            if connection.virtual_mcp_id.as_deref() == Some(entity.id.as_str()) {
                log::warn!(
                    "[virtual-mcp] skipping self-referencing connection {}",
                    connection.id
                );
                continue;
            }
            let named = entity
                .members
                .iter()
                .find(|member| member.connection_id == connection.id);
            match named {
                Some(member) if member.is_empty_selection() => continue,
                Some(member) => members.push(CollectionMember {
                    connection,
                    selected_tools: member.selected_tools.clone(),
                    selected_resources: member.selected_resources.clone(),
                    selected_prompts: member.selected_prompts.clone(),
                }),
                None => members.push(CollectionMember::unrestricted(connection)),
            }
        }
        members
    }

    pub fn entity(&self) -> &Arc<VirtualMcp> {
        &self.entity
    }

    pub fn instructions(&self) -> Option<&str> {
        self.entity.instructions.as_deref()
    }

    pub fn collection(&self) -> &Arc<ProxyCollection> {
        &self.collection
    }

    /// Capabilities this aggregated surface advertises.
    pub fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            prompts: Some(PromptsCapability {
                list_changed: Some(false),
            }),
            resources: Some(ResourcesCapability {
                subscribe: Some(false),
                list_changed: Some(false),
            }),
            tools: Some(ToolsCapability {
                list_changed: Some(false),
            }),
        }
    }

    pub async fn list_tools(&self) -> ListToolsResult {
        ListToolsResult::new(self.tools.list().await)
    }

    pub async fn call_tool(
        &self,
        params: CallToolRequestParam,
    ) -> Result<CallToolResult, GatewayError> {
        self.tools.call(params).await
    }

    pub async fn call_streamable_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<StreamableResponse, GatewayError> {
        self.tools.call_streamable(name, arguments).await
    }

    pub async fn list_resources(&self) -> ListResourcesResult {
        ListResourcesResult {
            resources: self.resources.list().await,
            next_cursor: None,
        }
    }

    pub async fn read_resource(
        &self,
        params: ReadResourceRequestParam,
    ) -> Result<ReadResourceResult, GatewayError> {
        self.resources.read(params).await
    }

    pub async fn list_resource_templates(&self) -> ListResourceTemplatesResult {
        ListResourceTemplatesResult {
            resource_templates: self.templates.list().await,
            next_cursor: None,
        }
    }

    pub async fn list_prompts(&self) -> ListPromptsResult {
        ListPromptsResult {
            prompts: self.prompts.list().await,
            next_cursor: None,
        }
    }

    pub async fn get_prompt(
        &self,
        params: GetPromptRequestParam,
    ) -> Result<GetPromptResult, GatewayError> {
        self.prompts.get(params).await
    }

    /// Releases every proxy in the collection exactly once.
    pub fn release(&self) {
        self.collection.release_all();
    }
}
