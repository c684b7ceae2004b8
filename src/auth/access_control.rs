use std::sync::Arc;

use crate::auth::permission::{PermissionEvaluator, PermissionRequest};
use crate::context::CallerIdentity;
use crate::errors::GatewayError;

/// Grant-based authorization for one tool invocation.
///
/// Constructed per call, checked once, dropped at call end. `check` has OR
/// semantics over the supplied resources and latches `granted` on first
/// pass so repeated checks within the same call are free.
pub struct AccessControl {
    identity: CallerIdentity,
    evaluator: Option<Arc<dyn PermissionEvaluator>>,
    connection_id: String,
    tool_name: Option<String>,
    granted: bool,
}

impl AccessControl {
    pub fn new(
        identity: CallerIdentity,
        evaluator: Option<Arc<dyn PermissionEvaluator>>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            evaluator,
            connection_id: connection_id.into(),
            tool_name: None,
            granted: false,
        }
    }

    /// Presets the resource checked when `check` is called with an empty
    /// list.
    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn is_granted(&self) -> bool {
        self.granted
    }

    /// Unconditionally grants.
    pub fn grant(&mut self) {
        self.granted = true;
    }

    /// OR-checks the resources (or the preset tool name when none are
    /// given). Passing latches the grant; failing raises `Unauthorized`
    /// when there is no identity at all, `Forbidden` otherwise.
    pub async fn check(&mut self, resources: &[String]) -> Result<(), GatewayError> {
        if self.granted {
            return Ok(());
        }

        if let Some(role) = self.identity.role() {
            if role.bypasses_authorization() {
                self.granted = true;
                return Ok(());
            }
        }

        let user_id = match self.identity.user_id() {
            Some(id) => id.to_string(),
            None => return Err(GatewayError::Unauthorized),
        };

        let resources: Vec<String> = if resources.is_empty() {
            match &self.tool_name {
                Some(name) => vec![name.clone()],
                None => {
                    return Err(GatewayError::Forbidden("No resources specified".to_string()))
                }
            }
        } else {
            resources.to_vec()
        };

        let evaluator = match &self.evaluator {
            Some(evaluator) => evaluator.clone(),
            None => {
                return Err(GatewayError::Forbidden(format!(
                    "Access denied to: {}",
                    resources.join(", ")
                )))
            }
        };

        let mut request = PermissionRequest::new();
        request.insert(self.connection_id.clone(), resources.clone());
        let response = evaluator.has_permission(&user_id, &request).await;

        let allowed = response
            .get(&self.connection_id)
            .is_some_and(|answers| answers.iter().any(|granted| *granted));

        if allowed {
            self.granted = true;
            Ok(())
        } else {
            Err(GatewayError::Forbidden(format!(
                "Access denied to: {}",
                resources.join(", ")
            )))
        }
    }
}
