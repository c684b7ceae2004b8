pub mod access_control;
pub mod delegation;
pub mod middleware;
pub mod permission;

pub use access_control::AccessControl;
pub use delegation::DelegationSigner;
pub use middleware::AuthorizationMiddleware;
pub use permission::{PermissionEvaluator, StaticPermissionEvaluator};
