pub mod auth;
pub mod config;
pub mod context;
pub mod errors;
pub mod jsonrpc;
pub mod logging;
pub mod monitor;
pub mod proxy;
pub mod service;
pub mod sse_event;
pub mod store;
pub mod types;
pub mod utils;
pub mod vmcp;
