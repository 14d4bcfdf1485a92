use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::auth::{AppState, resolve_token, run_db};
use crate::error::ApiError;

/// Extract and validate the JWT from the Authorization header, keep the
/// caller's public summary current in the store, and hand the claims to
/// the handler as an extension.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthenticated)?;

    let claims = resolve_token(&state.jwt_secret, token)?;

    let summary = claims.summary();
    run_db(&state, move |db| {
        db.upsert_user(&summary.id.to_string(), &summary.name, summary.image.as_deref())
    })
    .await?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
