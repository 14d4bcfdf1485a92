//! Ephemeral signals between two matched users. Both re-check the match on
//! every call so nobody can signal across a pair that is not matched.

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
};

use kindred_types::api::{Claims, ReadReceiptRequest, ReadReceiptResponse, SignalResponse, TypingRequest};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::matches::require_participant;
use crate::messages::{ReceiptPolicy, mark_as_read};

/// POST /typing: not persisted.
pub async fn typing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<TypingRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let m = require_participant(&state, req.match_id, claims.sub).await?;
    if m.other(claims.sub) != Some(req.receiver_id) {
        return Err(ApiError::Forbidden("Receiver is not part of this match"));
    }

    let pushed = state
        .notifier
        .typing_changed(req.receiver_id, m.id, claims.sub, req.is_typing)
        .await
        .is_ok();

    Ok(Json(SignalResponse { success: true, pushed }))
}

/// POST /read-receipt: marks the caller's side read, then tells the sender.
pub async fn read_receipt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<ReadReceiptRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let m = require_participant(&state, req.match_id, claims.sub).await?;
    let (marked, pushed) = mark_as_read(&state, &m, claims.sub, ReceiptPolicy::Always).await?;

    Ok(Json(ReadReceiptResponse {
        success: true,
        marked,
        pushed,
    }))
}
