use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sqlx::SqlitePool;
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::models::OauthState;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Send plus the thread reads used for reply detection, plus the ID-token
/// claims that carry the connected address.
pub const SCOPES: &str = "https://www.googleapis.com/auth/gmail.send \
https://www.googleapis.com/auth/gmail.readonly openid email";

const STATE_TTL_MS: i64 = 15 * 60 * 1000;

/// Builds the provider authorization URL. `access_type=offline` and
/// `prompt=consent` are both required: without the consent prompt the
/// provider may omit `refresh_token` on re-grants.
pub fn auth_url(config: &Config, state: &str) -> String {
    let url = Url::parse_with_params(
        AUTH_ENDPOINT,
        &[
            ("client_id", config.google_client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", SCOPES),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
        ],
    )
    .expect("static auth endpoint URL is valid");
    url.into()
}

/// Persists a state ticket with a 15-minute TTL and returns its nonce.
pub async fn create_state(
    pool: &SqlitePool,
    now_ms: i64,
    owner_id: &str,
    return_url: Option<&str>,
) -> ApiResult<String> {
    let state = Uuid::new_v4().simple().to_string();
    sqlx::query(
        "INSERT INTO oauth_states (state, owner_id, return_url, expires_at, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&state)
    .bind(owner_id)
    .bind(return_url)
    .bind(now_ms + STATE_TTL_MS)
    .bind(now_ms)
    .execute(pool)
    .await?;
    Ok(state)
}

/// Consumes a state ticket. The DELETE enforces single use: a replayed nonce
/// finds no row and is rejected, as is an expired one.
pub async fn consume_state(pool: &SqlitePool, now_ms: i64, state: &str) -> ApiResult<OauthState> {
    let row: Option<OauthState> =
        sqlx::query_as("DELETE FROM oauth_states WHERE state = ? RETURNING *")
            .bind(state)
            .fetch_optional(pool)
            .await?;
    match row {
        Some(ticket) if ticket.expires_at >= now_ms => Ok(ticket),
        _ => Err(ApiError::validation("Invalid or expired state")),
    }
}

/// Best-effort expiry sweep; handlers call this opportunistically.
pub async fn purge_expired_states(pool: &SqlitePool, now_ms: i64) -> Result<u64, sqlx::Error> {
    let res = sqlx::query("DELETE FROM oauth_states WHERE expires_at < ?")
        .bind(now_ms)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Extracts the `email` claim from an ID token by decoding its payload
/// segment. No signature verification: the token came straight from the
/// provider's token endpoint over TLS.
pub fn id_token_email(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("email")?.as_str().map(str::to_string)
}
