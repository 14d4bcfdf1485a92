use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Json, extract::State, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{error, info};
use uuid::Uuid;

use kindred_db::Database;
use kindred_gateway::Notifier;
use kindred_types::api::Claims;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub notifier: Notifier,
}

/// Run blocking DB work off the async runtime.
pub async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Store(anyhow::anyhow!("blocking task failed: {e}"))
        })?
        .map_err(ApiError::Store)
}

/// Mint a session token. Tokens are normally issued by the external
/// identity provider sharing `secret`; this exists for it and for tests.
pub fn issue_token(
    secret: &str,
    user_id: Uuid,
    name: &str,
    picture: Option<&str>,
    ttl: Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        picture: picture.map(str::to_string),
        exp: (chrono::Utc::now().timestamp() + ttl.as_secs() as i64) as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Map a session token to the identity it was issued for.
pub fn resolve_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthenticated)
}

/// DELETE /account: removes the caller and, by cascade, their actions,
/// matches and messages.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.to_string();
    let deleted = run_db(&state, move |db| db.delete_user(&uid)).await?;
    if !deleted {
        return Err(ApiError::NotFound("User"));
    }

    info!("{} ({}) deleted their account", claims.name, claims.sub);
    Ok(Json(serde_json::json!({ "success": true })))
}
