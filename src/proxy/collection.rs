use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{
    auth::delegation::DelegationSigner, config::Connection, context::RequestContext,
    proxy::connection::ConnectionProxy,
};

/// One member of a collection: the proxy plus the selection lists the
/// virtual MCP attached to this connection. `None` means "all".
pub struct ProxyEntry {
    pub proxy: Arc<ConnectionProxy>,
    pub connection: Arc<Connection>,
    pub selected_tools: Option<Vec<String>>,
    pub selected_resources: Option<Vec<String>>,
    pub selected_prompts: Option<Vec<String>>,
}

/// Resolved member input for collection construction.
pub struct CollectionMember {
    pub connection: Arc<Connection>,
    pub selected_tools: Option<Vec<String>>,
    pub selected_resources: Option<Vec<String>>,
    pub selected_prompts: Option<Vec<String>>,
}

impl CollectionMember {
    pub fn unrestricted(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            selected_tools: None,
            selected_resources: None,
            selected_prompts: None,
        }
    }
}

/// Ordered set of proxies for one client session. Entries keep the member
/// order they were built from; every aggregated listing iterates in this
/// order.
///
/// The collection owns its proxies: nothing else releases them, and
/// release happens exactly once when the front door's scope ends.
pub struct ProxyCollection {
    entries: Vec<ProxyEntry>,
    released: AtomicBool,
}

impl ProxyCollection {
    /// Builds proxies for every member. A member whose proxy cannot be
    /// constructed is logged and omitted; siblings are unaffected.
    pub fn build(
        members: Vec<CollectionMember>,
        ctx: &Arc<RequestContext>,
        signer: &Arc<DelegationSigner>,
    ) -> Self {
        let mut entries = Vec::with_capacity(members.len());
        for member in members {
            match ConnectionProxy::new(member.connection.clone(), ctx.clone(), signer.clone()) {
                Ok(proxy) => entries.push(ProxyEntry {
                    proxy: Arc::new(proxy),
                    connection: member.connection,
                    selected_tools: member.selected_tools,
                    selected_resources: member.selected_resources,
                    selected_prompts: member.selected_prompts,
                }),
                Err(e) => {
                    log::warn!(
                        "[proxy] skipping connection {}: proxy construction failed: {e}",
                        member.connection.id
                    );
                }
            }
        }
        Self {
            entries,
            released: AtomicBool::new(false),
        }
    }

    pub fn entries(&self) -> &[ProxyEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, connection_id: &str) -> Option<&ProxyEntry> {
        self.entries
            .iter()
            .find(|entry| entry.connection.id == connection_id)
    }

    /// Releases every proxy exactly once, tolerating individual close
    /// failures. Safe to call more than once.
    pub fn release_all(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        for entry in &self.entries {
            entry.proxy.release();
        }
    }
}

impl Drop for ProxyCollection {
    fn drop(&mut self) {
        // Scope-exit backstop: release still happens if the owning
        // session unwinds or is cancelled before the explicit call.
        self.release_all();
    }
}
