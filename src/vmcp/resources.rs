use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::OnceCell;

use crate::{
    config::SelectionMode,
    errors::GatewayError,
    proxy::ProxyCollection,
    types::{ReadResourceRequestParam, ReadResourceResult, Resource, ResourceTemplate},
    vmcp::tools::selection_allows,
};

struct AggregatedResources {
    resources: Vec<Resource>,
    /// URI → owning connection. URIs are assumed globally unique across
    /// upstreams; a collision is a tenant misconfiguration and the later
    /// listing wins with a warning.
    routes: HashMap<String, String>,
}

/// Merges resource listings across the collection and routes reads by
/// URI.
pub struct ResourceAggregator {
    collection: Arc<ProxyCollection>,
    mode: SelectionMode,
    cache: OnceCell<AggregatedResources>,
}

impl ResourceAggregator {
    pub fn new(collection: Arc<ProxyCollection>, mode: SelectionMode) -> Self {
        Self {
            collection,
            mode,
            cache: OnceCell::new(),
        }
    }

    pub async fn list(&self) -> Vec<Resource> {
        self.ensure().await.resources.clone()
    }

    pub async fn read(
        &self,
        params: ReadResourceRequestParam,
    ) -> Result<ReadResourceResult, GatewayError> {
        let aggregated = self.ensure().await;
        let connection_id = aggregated
            .routes
            .get(&params.uri)
            .ok_or_else(|| GatewayError::ResourceNotFound(params.uri.clone()))?;
        let entry = self
            .collection
            .get(connection_id)
            .ok_or_else(|| GatewayError::ResourceNotFound(params.uri.clone()))?;
        entry.proxy.read_resource(&params).await
    }

    async fn ensure(&self) -> &AggregatedResources {
        self.cache.get_or_init(|| self.aggregate()).await
    }

    async fn aggregate(&self) -> AggregatedResources {
        let entries = self.collection.entries();
        let listings = join_all(entries.iter().map(|entry| async move {
            // An upstream that never advertised the resources capability
            // contributes an empty list without a network call.
            if entry
                .proxy
                .capabilities()
                .is_some_and(|caps| !caps.has_resources())
            {
                return Some(Vec::new());
            }
            match entry.proxy.list_resources().await {
                Ok(resources) => Some(resources),
                Err(e) => {
                    log::warn!(
                        "[virtual-mcp] resources/list failed for {}: {e}",
                        entry.connection.id
                    );
                    None
                }
            }
        }))
        .await;

        let mut resources = Vec::new();
        let mut routes: HashMap<String, String> = HashMap::new();
        for (entry, listing) in entries.iter().zip(listings) {
            let Some(listed) = listing else { continue };
            for resource in listed {
                if !selection_allows(self.mode, &entry.selected_resources, &resource.uri) {
                    continue;
                }
                if let Some(previous) =
                    routes.insert(resource.uri.clone(), entry.connection.id.clone())
                {
                    log::warn!(
                        "[virtual-mcp] resource uri {} published by both {previous} and {}; \
                         keeping the latter",
                        resource.uri,
                        entry.connection.id
                    );
                    resources.retain(|existing: &Resource| existing.uri != resource.uri);
                }
                resources.push(resource);
            }
        }

        AggregatedResources { resources, routes }
    }
}

struct AggregatedTemplates {
    templates: Vec<ResourceTemplate>,
    routes: HashMap<String, String>,
}

/// Concatenates resource-template listings across the collection.
pub struct ResourceTemplateAggregator {
    collection: Arc<ProxyCollection>,
    cache: OnceCell<AggregatedTemplates>,
}

impl ResourceTemplateAggregator {
    pub fn new(collection: Arc<ProxyCollection>) -> Self {
        Self {
            collection,
            cache: OnceCell::new(),
        }
    }

    pub async fn list(&self) -> Vec<ResourceTemplate> {
        self.ensure().await.templates.clone()
    }

    /// Owning connection of a template, for read-template routing.
    pub async fn route_for(&self, uri_template: &str) -> Option<String> {
        self.ensure().await.routes.get(uri_template).cloned()
    }

    async fn ensure(&self) -> &AggregatedTemplates {
        self.cache.get_or_init(|| self.aggregate()).await
    }

    async fn aggregate(&self) -> AggregatedTemplates {
        let entries = self.collection.entries();
        let listings = join_all(entries.iter().map(|entry| async move {
            if entry
                .proxy
                .capabilities()
                .is_some_and(|caps| !caps.has_resources())
            {
                return Some(Vec::new());
            }
            match entry.proxy.list_resource_templates().await {
                Ok(templates) => Some(templates),
                Err(e) => {
                    log::warn!(
                        "[virtual-mcp] resources/templates/list failed for {}: {e}",
                        entry.connection.id
                    );
                    None
                }
            }
        }))
        .await;

        let mut templates = Vec::new();
        let mut routes = HashMap::new();
        for (entry, listing) in entries.iter().zip(listings) {
            let Some(listed) = listing else { continue };
            for template in listed {
                routes
                    .entry(template.uri_template.clone())
                    .or_insert_with(|| entry.connection.id.clone());
                templates.push(template);
            }
        }

        AggregatedTemplates { templates, routes }
    }
}
