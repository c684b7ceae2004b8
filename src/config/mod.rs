pub mod connection;
pub mod tenant;
pub mod virtual_mcp;

pub use connection::*;
pub use tenant::*;
pub use virtual_mcp::*;

use std::{fs, net::SocketAddr};

use log::{debug, trace};
use pingora::server::configuration::{Opt, ServerConf};
use pingora_error::{Error, ErrorType::*, OrErr, Result};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Server name advertised in MCP `initialize` responses.
pub const SERVER_NAME: &str = "mesh_gateway";
/// Server version advertised in MCP `initialize` responses.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 2024-11-05 specification protocol;
/// client SSE endpoint for receiving messages from the gateway.
pub const CLIENT_SSE_ENDPOINT: &str = "/sse";
/// Client HTTP endpoint paired with the SSE endpoint.
pub const CLIENT_MESSAGE_ENDPOINT: &str = "/messages/";

/// Trait for types with an ID field, used for unique ID validation.
pub trait Identifiable {
    /// Returns the ID of the object.
    fn id(&self) -> &str;
    /// Sets the ID of the object.
    fn set_id(&mut self, id: String);
}

macro_rules! impl_identifiable {
    ($type:ty) => {
        impl Identifiable for $type {
            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }
        }
    };
}

impl_identifiable!(Connection);
impl_identifiable!(VirtualMcp);
impl_identifiable!(Tenant);

/// Root configuration for the mesh gateway.
#[derive(Default, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Config::validate_resource_ids"))]
pub struct Config {
    /// The pingora server defaults.
    #[serde(default)]
    pub pingora: ServerConf,
    /// Gateway listener and telemetry configuration.
    #[validate(nested)]
    pub gateway: GatewayConfig,
    /// Registered tenants.
    #[validate(nested)]
    #[serde(default)]
    pub tenants: Vec<Tenant>,
    /// Registered upstream connections.
    #[validate(nested)]
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Virtual MCP compositions.
    #[validate(nested)]
    #[serde(default)]
    pub virtual_mcps: Vec<VirtualMcp>,
    /// Static permission table consumed by the built-in evaluator.
    #[validate(nested)]
    #[serde(default)]
    pub permissions: Vec<Grant>,
}

impl Config {
    /// load gateway config from a yaml file
    pub fn load_from_yaml<P>(path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).or_err_with(ReadError, || {
            format!("Unable to read conf file from {path}")
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    /// config file load entry point
    pub fn load_yaml_with_opt_override(opt: &Opt) -> Result<Self> {
        if let Some(path) = &opt.conf {
            let mut conf = Self::load_from_yaml(path)?;
            conf.merge_with_opt(opt);
            Ok(conf)
        } else {
            Error::e_explain(ReadError, "No path specified")
        }
    }

    /// load gateway config from a yaml string
    pub fn from_yaml(conf_str: &str) -> Result<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str).or_err_with(ReadError, || {
            format!("Unable to parse yaml conf {conf_str}")
        })?;

        conf.validate()
            .or_err_with(FileReadError, || "Conf file valid failed")?;

        Ok(conf)
    }

    /// merge conf with opt
    pub fn merge_with_opt(&mut self, opt: &Opt) {
        if opt.daemon {
            self.pingora.daemon = true;
        }
    }

    fn validate_resource_ids(&self) -> std::result::Result<(), ValidationError> {
        fn has_duplicates<'a, I: Iterator<Item = &'a str>>(ids: I) -> bool {
            let mut seen = std::collections::HashSet::new();
            for id in ids {
                if !seen.insert(id) {
                    return true;
                }
            }
            false
        }

        if has_duplicates(self.connections.iter().map(|c| c.id.as_str())) {
            return Err(ValidationError::new("duplicate_connection_id"));
        }
        if has_duplicates(self.virtual_mcps.iter().map(|v| v.id.as_str())) {
            return Err(ValidationError::new("duplicate_virtual_mcp_id"));
        }
        if has_duplicates(self.tenants.iter().map(|t| t.id.as_str())) {
            return Err(ValidationError::new("duplicate_tenant_id"));
        }
        Ok(())
    }
}

/// Gateway-specific configuration: listeners, telemetry sinks, delegation
/// token signing.
#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
pub struct GatewayConfig {
    /// The addresses to listen on.
    #[validate(length(min = 1))]
    #[validate(nested)]
    pub listeners: Vec<Listener>,
    /// Externally reachable base URL, embedded in delegation tokens.
    #[serde(default)]
    pub base_url: String,
    /// Delegation token signing configuration.
    #[validate(nested)]
    #[serde(default)]
    pub delegation: DelegationConfig,
    /// Optional prometheus metrics listener.
    #[validate(nested)]
    pub prometheus: Option<Prometheus>,
    /// Optional sentry error reporting.
    pub sentry: Option<Sentry>,
    /// Optional file log sink.
    pub log: Option<Log>,
}

/// Configuration listener for the gateway. TCP by default, TLS when a
/// certificate pair is given.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Listener {
    /// The address to listen on.
    pub address: SocketAddr,
    /// The TLS configuration for the listener.
    pub tls: Option<Tls>,
}

/// Certificate/key pair for a TLS listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tls {
    /// The path to the certificate file.
    pub cert_path: String,
    /// The path to the key file.
    pub key_path: String,
}

/// Signing parameters for the short-lived delegation token injected into
/// every upstream call.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct DelegationConfig {
    /// HS256 signing secret.
    pub secret: String,
    /// Token lifetime in seconds. Minutes, not hours.
    #[serde(default = "default_delegation_ttl")]
    pub ttl_secs: u64,
}

fn default_delegation_ttl() -> u64 {
    300
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_secs: default_delegation_ttl(),
        }
    }
}

/// Prometheus metrics listener address.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Prometheus {
    pub address: SocketAddr,
}

/// Sentry DSN.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sentry {
    pub dsn: String,
}

/// File log sink path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Log {
    pub path: String,
}
