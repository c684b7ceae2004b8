#![allow(clippy::upper_case_acronyms)]

use std::sync::Arc;

use pingora::services::listening::Service;
use pingora_core::server::{configuration::Opt, configuration::ServerConf, Server};
use pingora_proxy::{http_proxy_service_with_name, HttpProxy};
use sentry::IntoDsn;
use tokio::sync::broadcast;

use mesh_gateway::config::{self, Config};
use mesh_gateway::logging;
use mesh_gateway::service::{GatewayHandler, GatewayService};
use mesh_gateway::store;

fn main() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    std::env::set_var(
        "RUST_LOG",
        format!("{log_level},pingora_core=warn,pingora_proxy=warn"),
    );

    let cli_options = Opt::parse_args();
    let initial_config = Config::load_yaml_with_opt_override(&cli_options)
        .expect("Failed to load initial configuration");

    logging::init(initial_config.gateway.log.as_ref());

    log::info!("Loading tenants, connections and virtual MCPs...");
    store::load_static_tenants(&initial_config);
    store::load_static_connections(&initial_config);
    store::load_static_virtual_mcps(&initial_config);

    let server_cli_options = Opt {
        conf: cli_options.conf.clone(),
        ..cli_options
    };
    let mut gateway_server = Server::new_with_opt_and_conf(
        Some(server_cli_options),
        clone_server_conf(&initial_config.pingora),
    );

    let (tx, _) = broadcast::channel(16);
    let handler = Arc::new(GatewayHandler::from_config(&initial_config));

    let mut http_service: Service<HttpProxy<GatewayService>> = http_proxy_service_with_name(
        &gateway_server.configuration,
        GatewayService::new(tx, handler),
        "mesh_gateway",
    );

    log::info!("Adding listeners...");
    add_listeners(&mut http_service, &initial_config.gateway);

    add_optional_services(&mut gateway_server, &initial_config.gateway);

    log::info!("Bootstrapping...");
    gateway_server.bootstrap();
    log::info!("Bootstrapped. Adding Services...");
    gateway_server.add_service(http_service);

    log::info!("Starting Server...");
    for list_cfg in initial_config.gateway.listeners.iter() {
        let addr = &list_cfg.address.to_string();
        log::info!("Listening on: {addr}");
        log::info!("---->Virtual MCP Endpoint: {addr}/mcp/virtual-mcp/:id");
        log::info!("---->Connection Endpoint:  {addr}/mcp/:connection_id");
        log::info!("---->Mesh Endpoint:        {addr}/mcp/mesh/:org_slug");
        initial_config.virtual_mcps.iter().for_each(|vmcp| {
            log::info!("-------->Virtual MCP: {addr}/mcp/virtual-mcp/{}", vmcp.id);
        });
    }

    gateway_server.run_forever();
}

// `ServerConf` (from pingora-core) does not implement `Clone`, so clone it field-by-field.
fn clone_server_conf(conf: &ServerConf) -> ServerConf {
    ServerConf {
        version: conf.version,
        daemon: conf.daemon,
        error_log: conf.error_log.clone(),
        pid_file: conf.pid_file.clone(),
        upgrade_sock: conf.upgrade_sock.clone(),
        user: conf.user.clone(),
        group: conf.group.clone(),
        threads: conf.threads,
        listener_tasks_per_fd: conf.listener_tasks_per_fd,
        work_stealing: conf.work_stealing,
        ca_file: conf.ca_file.clone(),
        grace_period_seconds: conf.grace_period_seconds,
        graceful_shutdown_timeout_seconds: conf.graceful_shutdown_timeout_seconds,
        client_bind_to_ipv4: conf.client_bind_to_ipv4.clone(),
        client_bind_to_ipv6: conf.client_bind_to_ipv6.clone(),
        upstream_keepalive_pool_size: conf.upstream_keepalive_pool_size,
        upstream_connect_offload_threadpools: conf.upstream_connect_offload_threadpools,
        upstream_connect_offload_thread_per_pool: conf.upstream_connect_offload_thread_per_pool,
        upstream_debug_ssl_keylog: conf.upstream_debug_ssl_keylog,
        max_retries: conf.max_retries,
    }
}

fn add_listeners(
    http_service: &mut Service<HttpProxy<GatewayService>>,
    gateway_cfg: &config::GatewayConfig,
) {
    for list_cfg in gateway_cfg.listeners.iter() {
        if let Some(tls) = &list_cfg.tls {
            if let Err(e) =
                http_service.add_tls(&list_cfg.address.to_string(), &tls.cert_path, &tls.key_path)
            {
                log::error!("Failed to add TLS listener {}: {e}", list_cfg.address);
            }
        } else {
            http_service.add_tcp(&list_cfg.address.to_string());
        }
    }
}

fn add_optional_services(server: &mut Server, gateway_cfg: &config::GatewayConfig) {
    if let Some(sentry_cfg) = &gateway_cfg.sentry {
        log::info!("Adding Sentry config...");
        server.sentry = Some(sentry::ClientOptions {
            dsn: sentry_cfg
                .dsn
                .clone()
                .into_dsn()
                .expect("Invalid Sentry DSN"),
            ..Default::default()
        });
    }

    if let Some(prometheus_cfg) = &gateway_cfg.prometheus {
        log::info!("Adding Prometheus Service...");
        let mut prometheus_service_http = Service::prometheus_http_service();
        prometheus_service_http.add_tcp(&prometheus_cfg.address.to_string());
        server.add_service(prometheus_service_http);
    }
}
