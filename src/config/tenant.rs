use serde::{Deserialize, Serialize};
use validator::Validate;

/// An organization owning connections and virtual MCPs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Tenant {
    #[validate(length(min = 1))]
    pub id: String,
    /// URL-safe slug, resolvable via the `x-org-slug` header.
    #[validate(length(min = 1))]
    pub slug: String,
    #[serde(default)]
    pub title: String,
}

/// One row of the static permission table: the named user may invoke the
/// listed tools on the connection.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Grant {
    #[validate(length(min = 1))]
    pub user_id: String,
    #[validate(length(min = 1))]
    pub connection_id: String,
    #[serde(default)]
    pub tools: Vec<String>,
}
