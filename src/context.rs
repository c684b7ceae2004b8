use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::permission::PermissionEvaluator;
use crate::monitor::event::{AuditSink, LogAuditSink};
use crate::monitor::tracer::{LogTracer, Tracer};

/// Caller role resolved by the authentication provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Owner,
    User,
}

impl UserRole {
    /// Admin and owner bypass per-tool permission checks.
    pub fn bypasses_authorization(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Owner)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "admin" => Some(UserRole::Admin),
            "owner" => Some(UserRole::Owner),
            "user" => Some(UserRole::User),
            _ => None,
        }
    }
}

/// Who is calling. Resolved outside the core by the authentication
/// provider; the core only branches on its shape.
#[derive(Debug, Clone)]
pub enum CallerIdentity {
    UserSession { user_id: String, role: UserRole },
    ApiKey { user_id: String },
    Anonymous,
}

impl CallerIdentity {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            CallerIdentity::UserSession { user_id, .. } => Some(user_id),
            CallerIdentity::ApiKey { user_id } => Some(user_id),
            CallerIdentity::Anonymous => None,
        }
    }

    pub fn role(&self) -> Option<UserRole> {
        match self {
            CallerIdentity::UserSession { role, .. } => Some(*role),
            _ => None,
        }
    }
}

/// Per-request tenant context and capability handles. Built once by the
/// front door and shared read-only by every proxy of the session.
pub struct RequestContext {
    /// Owning tenant; mandatory once a connection is resolved, absent only
    /// for the default agent before resolution.
    pub organization_id: Option<String>,
    pub identity: CallerIdentity,
    /// Propagated onward as the `x-caller-id` header.
    pub caller_connection_id: Option<String>,
    /// Externally reachable base URL of this gateway.
    pub base_url: String,
    pub request_id: String,
    pub permissions: Option<Arc<dyn PermissionEvaluator>>,
    pub tracer: Arc<dyn Tracer>,
    pub audit: Arc<dyn AuditSink>,
}

impl RequestContext {
    pub fn new(organization_id: Option<String>, identity: CallerIdentity) -> Self {
        Self {
            organization_id,
            identity,
            caller_connection_id: None,
            base_url: String::new(),
            request_id: uuid::Uuid::new_v4().to_string(),
            permissions: None,
            tracer: Arc::new(LogTracer),
            audit: Arc::new(LogAuditSink),
        }
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionEvaluator>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_caller_connection(mut self, caller: Option<String>) -> Self {
        self.caller_connection_id = caller;
        self
    }
}
