use std::sync::Arc;

use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use http::HeaderMap;
use tokio::sync::OnceCell;

use crate::{
    auth::delegation::DelegationSigner, config::Connection, context::RequestContext,
};

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const MESH_TOKEN_HEADER: &str = "x-mesh-token";

/// Builds the upstream credential headers for one proxy, at most once.
///
/// Concurrent callers coalesce onto the same in-flight issuance; a failed
/// token mint is logged and the proxy continues without a delegation
/// token (upstreams that require one fail on their own).
pub struct CredentialBinder {
    connection: Arc<Connection>,
    ctx: Arc<RequestContext>,
    signer: Arc<DelegationSigner>,
    headers: OnceCell<HeaderMap>,
}

impl CredentialBinder {
    pub fn new(
        connection: Arc<Connection>,
        ctx: Arc<RequestContext>,
        signer: Arc<DelegationSigner>,
    ) -> Self {
        Self {
            connection,
            ctx,
            signer,
            headers: OnceCell::new(),
        }
    }

    /// Returns the bound headers, issuing the delegation token on first
    /// use only.
    pub async fn ensure(&self) -> &HeaderMap {
        self.headers
            .get_or_init(|| async { self.build_headers() })
            .await
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(token) = &self.connection.connection_token {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(e) => log::warn!(
                    "[proxy] invalid connection token for {}: {e}",
                    self.connection.id
                ),
            }
        }

        if let Some(caller) = &self.ctx.caller_connection_id {
            if let Ok(value) = HeaderValue::from_str(caller) {
                headers.insert(HeaderName::from_static(CALLER_ID_HEADER), value);
            }
        }

        match self.signer.mint(&self.connection, &self.ctx) {
            Ok(token) => {
                if let Ok(value) = HeaderValue::from_str(&token) {
                    headers.insert(HeaderName::from_static(MESH_TOKEN_HEADER), value);
                }
            }
            Err(e) => {
                log::warn!(
                    "[proxy] delegation token issuance failed for {}: {e}",
                    self.connection.id
                );
            }
        }

        // Upstream-declared headers win over everything bound above.
        if let Some(extra) = &self.connection.connection_headers {
            for (name, value) in extra {
                match (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(name), Ok(value)) => {
                        headers.insert(name, value);
                    }
                    _ => log::warn!(
                        "[proxy] skipping invalid connection header {name} for {}",
                        self.connection.id
                    ),
                }
            }
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionType, DelegationConfig, EntityStatus};
    use crate::context::CallerIdentity;
    use serde_json::Map;
    use std::collections::HashMap;

    fn binder(extra_headers: Option<HashMap<String, String>>) -> CredentialBinder {
        let connection = Arc::new(Connection {
            id: "c1".into(),
            organization_id: "org1".into(),
            title: "Search".into(),
            connection_type: ConnectionType::HttpStreamable,
            url: "http://127.0.0.1:9000/mcp".into(),
            connection_token: Some("static-token".into()),
            connection_headers: extra_headers,
            configuration_state: Map::new(),
            configuration_scopes: Vec::new(),
            tool_index: None,
            capabilities: None,
            virtual_mcp_id: None,
            status: EntityStatus::Active,
        });
        let ctx = Arc::new(
            RequestContext::new(
                Some("org1".into()),
                CallerIdentity::ApiKey { user_id: "u1".into() },
            )
            .with_caller_connection(Some("caller-7".into())),
        );
        let signer = Arc::new(DelegationSigner::new(&DelegationConfig {
            secret: "sekrit".into(),
            ttl_secs: 60,
        }));
        CredentialBinder::new(connection, ctx, signer)
    }

    #[tokio::test]
    async fn binds_bearer_caller_and_mesh_token() {
        let binder = binder(None);
        let headers = binder.ensure().await;
        assert_eq!(
            headers.get(AUTHORIZATION).unwrap(),
            "Bearer static-token"
        );
        assert_eq!(headers.get(CALLER_ID_HEADER).unwrap(), "caller-7");
        assert!(headers.contains_key(MESH_TOKEN_HEADER));
    }

    #[tokio::test]
    async fn connection_headers_win_over_bound_headers() {
        let mut extra = HashMap::new();
        extra.insert("authorization".to_string(), "Bearer override".to_string());
        extra.insert("x-extra".to_string(), "1".to_string());
        let binder = binder(Some(extra));
        let headers = binder.ensure().await;
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer override");
        assert_eq!(headers.get("x-extra").unwrap(), "1");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_issuance() {
        let binder = Arc::new(binder(None));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let binder = binder.clone();
            handles.push(tokio::spawn(async move {
                binder.ensure().await.get(MESH_TOKEN_HEADER).cloned()
            }));
        }
        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap());
        }
        // the token carries a random jti, so equality proves a single mint
        assert!(tokens.windows(2).all(|pair| pair[0] == pair[1]));
    }
}
