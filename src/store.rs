//! In-process registries for connections, virtual MCPs and tenants.
//!
//! These maps are the storage seam: records are created and updated
//! outside the request path (config load today, an external store
//! tomorrow) and the core only reads them through the fetch functions
//! below.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::{
    config::{self, Connection, Tenant, VirtualMcp},
    errors::GatewayError,
};

/// Global map of connections, keyed by connection id.
pub static CONNECTION_MAP: Lazy<DashMap<String, Arc<Connection>>> = Lazy::new(DashMap::new);

/// Global map of virtual MCPs, keyed by id.
pub static VIRTUAL_MCP_MAP: Lazy<DashMap<String, Arc<VirtualMcp>>> = Lazy::new(DashMap::new);

/// Global map of tenants, keyed by tenant id.
pub static TENANT_MAP: Lazy<DashMap<String, Arc<Tenant>>> = Lazy::new(DashMap::new);

pub fn connection_fetch(id: &str) -> Option<Arc<Connection>> {
    CONNECTION_MAP.get(id).map(|entry| entry.value().clone())
}

pub fn virtual_mcp_fetch(id: &str) -> Option<Arc<VirtualMcp>> {
    VIRTUAL_MCP_MAP.get(id).map(|entry| entry.value().clone())
}

pub fn tenant_fetch(id: &str) -> Option<Arc<Tenant>> {
    TENANT_MAP.get(id).map(|entry| entry.value().clone())
}

pub fn tenant_fetch_by_slug(slug: &str) -> Option<Arc<Tenant>> {
    TENANT_MAP
        .iter()
        .find(|entry| entry.value().slug == slug)
        .map(|entry| entry.value().clone())
}

/// All connections owned by a tenant, in registration order.
pub fn connections_for_tenant(organization_id: &str) -> Vec<Arc<Connection>> {
    let mut connections: Vec<Arc<Connection>> = CONNECTION_MAP
        .iter()
        .filter(|entry| entry.value().organization_id == organization_id)
        .map(|entry| entry.value().clone())
        .collect();
    // DashMap iteration order is arbitrary; listings must be stable.
    connections.sort_by(|a, b| a.id.cmp(&b.id));
    connections
}

/// Resolves a connection on behalf of a tenant, enforcing existence,
/// ownership and status in that order. Cross-tenant access reports
/// not-found.
pub fn resolve_connection(
    id: &str,
    organization_id: Option<&str>,
) -> Result<Arc<Connection>, GatewayError> {
    let connection = connection_fetch(id).ok_or(GatewayError::ConnectionNotFound)?;
    if let Some(org) = organization_id {
        if connection.organization_id != org {
            return Err(GatewayError::WrongTenant);
        }
    }
    if !connection.status.is_active() {
        return Err(GatewayError::ConnectionInactive);
    }
    Ok(connection)
}

/// Resolves a virtual MCP for a tenant with the same ordering as
/// [`resolve_connection`].
pub fn resolve_virtual_mcp(
    id: &str,
    organization_id: Option<&str>,
) -> Result<Arc<VirtualMcp>, GatewayError> {
    let vmcp = virtual_mcp_fetch(id).ok_or(GatewayError::VirtualMcpNotFound)?;
    if let Some(org) = organization_id {
        if vmcp.organization_id != org {
            return Err(GatewayError::VirtualMcpNotFound);
        }
    }
    if !vmcp.status.is_active() {
        return Err(GatewayError::VirtualMcpInactive);
    }
    Ok(vmcp)
}

/// Loads connections from the given configuration.
pub fn load_static_connections(config: &config::Config) {
    for connection in &config.connections {
        log::info!("Configuring connection: {}", connection.id);
        CONNECTION_MAP.insert(connection.id.clone(), Arc::new(connection.clone()));
    }
    log::info!("Loaded {} connection(s)", config.connections.len());
}

/// Loads virtual MCPs from the given configuration.
pub fn load_static_virtual_mcps(config: &config::Config) {
    for vmcp in &config.virtual_mcps {
        log::info!("Configuring virtual MCP: {}", vmcp.id);
        VIRTUAL_MCP_MAP.insert(vmcp.id.clone(), Arc::new(vmcp.clone()));
    }
    log::info!("Loaded {} virtual MCP(s)", config.virtual_mcps.len());
}

/// Loads tenants from the given configuration.
pub fn load_static_tenants(config: &config::Config) {
    for tenant in &config.tenants {
        TENANT_MAP.insert(tenant.id.clone(), Arc::new(tenant.clone()));
    }
    log::info!("Loaded {} tenant(s)", config.tenants.len());
}
