use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    config::{Connection, DelegationConfig},
    context::RequestContext,
    errors::GatewayError,
};

/// Claims of the short-lived delegation token (`x-mesh-token`) injected
/// into every upstream call so the upstream can authorize its own onward
/// calls on behalf of the end user.
#[derive(Debug, Serialize, Deserialize)]
pub struct DelegationClaims {
    pub sub: String,
    pub user: DelegationUser,
    pub metadata: DelegationMetadata,
    pub permissions: Map<String, Value>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DelegationUser {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationMetadata {
    pub state: Map<String, Value>,
    pub mesh_url: String,
    pub connection_id: String,
    pub organization_id: String,
}

/// HS256 signer for delegation tokens. Process-wide; one per gateway.
pub struct DelegationSigner {
    key: EncodingKey,
    ttl_secs: u64,
}

impl DelegationSigner {
    pub fn new(config: &DelegationConfig) -> Self {
        Self {
            key: EncodingKey::from_secret(config.secret.as_bytes()),
            ttl_secs: config.ttl_secs,
        }
    }

    /// Mints a token scoped to one connection and one caller. The
    /// permission map is derived from the connection's configuration
    /// state and scopes.
    pub fn mint(
        &self,
        connection: &Connection,
        ctx: &RequestContext,
    ) -> Result<String, GatewayError> {
        let user_id = ctx.identity.user_id().unwrap_or_default().to_string();
        let now = Utc::now().timestamp();
        let claims = DelegationClaims {
            sub: user_id.clone(),
            user: DelegationUser { id: user_id },
            metadata: DelegationMetadata {
                state: connection.configuration_state.clone(),
                mesh_url: ctx.base_url.clone(),
                connection_id: connection.id.clone(),
                organization_id: connection.organization_id.clone(),
            },
            permissions: connection.derived_permissions(),
            iat: now,
            exp: now + self.ttl_secs as i64,
            jti: uuid::Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.key)
            .map_err(|e| GatewayError::Internal(format!("failed to sign delegation token: {e}")))
    }
}
