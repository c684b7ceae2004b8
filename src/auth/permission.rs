use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Grant;

/// Resources queried per connection: `connection_id → [tool names]`.
pub type PermissionRequest = HashMap<String, Vec<String>>;

/// Per-connection answers, positionally aligned with the request lists.
pub type PermissionResponse = HashMap<String, Vec<bool>>;

/// Capability handle answering "may this user invoke these tools on these
/// connections". Implementations are process-wide and thread safe.
#[async_trait]
pub trait PermissionEvaluator: Send + Sync {
    async fn has_permission(&self, user_id: &str, request: &PermissionRequest)
        -> PermissionResponse;
}

/// Grants-table evaluator backed by the gateway config file.
pub struct StaticPermissionEvaluator {
    /// `(user_id, connection_id) → granted tool names`.
    grants: HashMap<(String, String), HashSet<String>>,
}

impl StaticPermissionEvaluator {
    pub fn from_grants(grants: &[Grant]) -> Arc<Self> {
        let mut table: HashMap<(String, String), HashSet<String>> = HashMap::new();
        for grant in grants {
            table
                .entry((grant.user_id.clone(), grant.connection_id.clone()))
                .or_default()
                .extend(grant.tools.iter().cloned());
        }
        Arc::new(Self { grants: table })
    }
}

#[async_trait]
impl PermissionEvaluator for StaticPermissionEvaluator {
    async fn has_permission(
        &self,
        user_id: &str,
        request: &PermissionRequest,
    ) -> PermissionResponse {
        request
            .iter()
            .map(|(connection_id, resources)| {
                let granted = self
                    .grants
                    .get(&(user_id.to_string(), connection_id.clone()));
                let answers = resources
                    .iter()
                    .map(|resource| granted.is_some_and(|tools| tools.contains(resource)))
                    .collect();
                (connection_id.clone(), answers)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> Arc<StaticPermissionEvaluator> {
        StaticPermissionEvaluator::from_grants(&[
            Grant {
                user_id: "u1".into(),
                connection_id: "c1".into(),
                tools: vec!["search".into(), "read".into()],
            },
            Grant {
                user_id: "u1".into(),
                connection_id: "c2".into(),
                tools: vec![],
            },
        ])
    }

    #[tokio::test]
    async fn answers_align_with_requested_resources() {
        let eval = evaluator();
        let mut request = PermissionRequest::new();
        request.insert("c1".into(), vec!["search".into(), "delete".into()]);
        let response = eval.has_permission("u1", &request).await;
        assert_eq!(response.get("c1"), Some(&vec![true, false]));
    }

    #[tokio::test]
    async fn unknown_user_gets_all_false() {
        let eval = evaluator();
        let mut request = PermissionRequest::new();
        request.insert("c1".into(), vec!["search".into()]);
        let response = eval.has_permission("nobody", &request).await;
        assert_eq!(response.get("c1"), Some(&vec![false]));
    }
}
