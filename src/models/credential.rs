use serde::{Deserialize, Serialize};

/// One per tenant. A row with a null `refresh_token` is non-functional:
/// sends against it fail with `no_refresh_token`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Credential {
    pub owner_id: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
}

/// Short-lived ticket binding an OAuth nonce to a tenant. Single-use,
/// rejected after `expires_at`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OauthState {
    pub state: String,
    pub owner_id: String,
    pub return_url: Option<String>,
    pub expires_at: i64,
    pub created_at: i64,
}
