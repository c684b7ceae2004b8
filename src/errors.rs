use http::StatusCode;
use thiserror::Error;

/// Error taxonomy for the gateway core.
///
/// Variants raised before any network I/O (`ConnectionNotFound`,
/// `ConnectionInactive`, `WrongTenant`) carry no upstream detail; the
/// front door maps them straight to HTTP statuses. Cross-tenant access is
/// reported as not-found so probing cannot confirm existence.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Connection is not active")]
    ConnectionInactive,

    #[error("Connection not found")]
    WrongTenant,

    #[error("Virtual MCP not found")]
    VirtualMcpNotFound,

    #[error("Virtual MCP is not active")]
    VirtualMcpInactive,

    #[error("Organization not found")]
    TenantNotFound,

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("upstream authentication failed: {0}")]
    UpstreamAuth(String),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("Request aborted")]
    Aborted,

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status this error surfaces as at the front door.
    /// Cross-tenant and inactive entities deliberately collapse onto
    /// 404/503 without tenant-specific text.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::ConnectionNotFound
            | GatewayError::WrongTenant
            | GatewayError::VirtualMcpNotFound
            | GatewayError::TenantNotFound
            | GatewayError::ResourceNotFound(_)
            | GatewayError::PromptNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::ConnectionInactive | GatewayError::VirtualMcpInactive => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::UpstreamAuth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Upstream { .. } | GatewayError::Transport(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Aborted | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            GatewayError::Transport(err.to_string())
        } else if err.is_decode() {
            GatewayError::Transport(format!("decode failure: {err}"))
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_tenant_maps_to_not_found_without_tenant_text() {
        let err = GatewayError::WrongTenant;
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Connection not found");
    }

    #[test]
    fn inactive_maps_to_service_unavailable() {
        assert_eq!(
            GatewayError::ConnectionInactive.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::VirtualMcpInactive.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn abort_maps_to_bad_request() {
        assert_eq!(
            GatewayError::Aborted.status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
