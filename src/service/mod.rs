pub mod endpoint;
pub mod handler;
pub mod mcp;

pub use handler::{DispatchOutcome, GatewayHandler, SessionParams};
pub use mcp::GatewayService;
