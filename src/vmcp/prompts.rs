use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::OnceCell;

use crate::{
    config::SelectionMode,
    errors::GatewayError,
    proxy::ProxyCollection,
    types::{GetPromptRequestParam, GetPromptResult, Prompt},
    vmcp::tools::selection_allows,
};

struct AggregatedPrompts {
    prompts: Vec<Prompt>,
    routes: HashMap<String, String>,
}

/// Merges prompt listings across the collection. Names dedup first-wins,
/// symmetric with tools.
pub struct PromptAggregator {
    collection: Arc<ProxyCollection>,
    mode: SelectionMode,
    cache: OnceCell<AggregatedPrompts>,
}

impl PromptAggregator {
    pub fn new(collection: Arc<ProxyCollection>, mode: SelectionMode) -> Self {
        Self {
            collection,
            mode,
            cache: OnceCell::new(),
        }
    }

    pub async fn list(&self) -> Vec<Prompt> {
        self.ensure().await.prompts.clone()
    }

    pub async fn get(
        &self,
        params: GetPromptRequestParam,
    ) -> Result<GetPromptResult, GatewayError> {
        let aggregated = self.ensure().await;
        let connection_id = aggregated
            .routes
            .get(&params.name)
            .ok_or_else(|| GatewayError::PromptNotFound(params.name.clone()))?;
        let entry = self
            .collection
            .get(connection_id)
            .ok_or_else(|| GatewayError::PromptNotFound(params.name.clone()))?;
        entry.proxy.get_prompt(&params).await
    }

    async fn ensure(&self) -> &AggregatedPrompts {
        self.cache.get_or_init(|| self.aggregate()).await
    }

    async fn aggregate(&self) -> AggregatedPrompts {
        let entries = self.collection.entries();
        let listings = join_all(entries.iter().map(|entry| async move {
            if entry
                .proxy
                .capabilities()
                .is_some_and(|caps| !caps.has_prompts())
            {
                return Some(Vec::new());
            }
            match entry.proxy.list_prompts().await {
                Ok(prompts) => Some(prompts),
                Err(e) => {
                    log::warn!(
                        "[virtual-mcp] prompts/list failed for {}: {e}",
                        entry.connection.id
                    );
                    None
                }
            }
        }))
        .await;

        let mut prompts: Vec<Prompt> = Vec::new();
        let mut routes: HashMap<String, String> = HashMap::new();
        for (entry, listing) in entries.iter().zip(listings) {
            let Some(listed) = listing else { continue };
            for prompt in listed {
                if !selection_allows(self.mode, &entry.selected_prompts, &prompt.name) {
                    continue;
                }
                if routes.contains_key(&prompt.name) {
                    continue;
                }
                routes.insert(prompt.name.clone(), entry.connection.id.clone());
                prompts.push(prompt);
            }
        }

        AggregatedPrompts { prompts, routes }
    }
}
