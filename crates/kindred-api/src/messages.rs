use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use kindred_types::api::{Claims, MessageHistoryResponse, Pagination, SendMessageRequest, SendMessageResponse};
use kindred_types::models::{Message, MessageType, MutualMatch};

use crate::auth::{AppState, run_db};
use crate::error::ApiError;
use crate::matches::require_participant;
use crate::rows;

pub const MAX_CONTENT_CHARS: usize = 1000;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// When `mark_as_read` should publish a read receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptPolicy {
    /// Always tell the other party (explicit read-receipt call).
    Always,
    /// Only if something actually flipped to read (viewing history).
    IfChanged,
}

fn validate_content(content: &str, message_type: MessageType) -> Result<(), ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::Validation("Message content cannot be empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::Validation(format!(
            "Message content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    if message_type == MessageType::Image && content.trim_start().starts_with("data:") {
        return Err(ApiError::Validation(
            "Image messages must reference a URL, not inline data".into(),
        ));
    }
    Ok(())
}

/// Persist a message between two matched users, then push it to the
/// receiver. Returns the stored message and whether the push succeeded.
///
/// The sender is never published to; its client appends the returned
/// message itself.
pub async fn send(
    state: &AppState,
    sender_id: Uuid,
    receiver_id: Uuid,
    content: String,
    message_type: MessageType,
) -> Result<(Message, bool), ApiError> {
    if receiver_id == sender_id {
        return Err(ApiError::Validation("Cannot message yourself".into()));
    }
    validate_content(&content, message_type)?;

    let message_id = Uuid::new_v4();
    let row = run_db(state, move |db| {
        let (sid, rid) = (sender_id.to_string(), receiver_id.to_string());
        let Some(m) = db.find_active_match(&sid, &rid)? else {
            return Ok(None);
        };
        db.insert_message(
            &message_id.to_string(),
            &m.id,
            &sid,
            &rid,
            &content,
            message_type.as_str(),
        )
    })
    .await?
    .ok_or(ApiError::Forbidden("No active match with this user"))?;

    let message = rows::message(row);
    let pushed = state.notifier.message_received(&message).await.is_ok();
    if !pushed {
        warn!("Message {} stored but not pushed to {}", message.id, receiver_id);
    }

    Ok((message, pushed))
}

/// POST /messages/send
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let (message, pushed) = send(&state, claims.sub, req.receiver_id, req.content, req.message_type).await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            success: true,
            message,
            pushed,
        }),
    ))
}

/// Mark everything in `m` addressed to `viewer` as read and, per `policy`,
/// tell the other participant. Returns (messages marked, receipt pushed).
pub async fn mark_as_read(
    state: &AppState,
    m: &MutualMatch,
    viewer: Uuid,
    policy: ReceiptPolicy,
) -> Result<(u64, bool), ApiError> {
    let other = m.other(viewer).ok_or(ApiError::Forbidden("Not a participant in this match"))?;

    let match_id = m.id;
    let marked = run_db(state, move |db| db.mark_read(&match_id.to_string(), &viewer.to_string())).await?;
    debug!("{} read {} message(s) in {}", viewer, marked, match_id);

    let pushed = match policy {
        ReceiptPolicy::IfChanged if marked == 0 => false,
        _ => state.notifier.read_receipt(other, match_id, viewer).await.is_ok(),
    };

    Ok((marked, pushed))
}

/// GET /messages/{match_id}?page&limit
///
/// Returns one page oldest-first. Viewing marks the caller's unread
/// messages read. Safe to call repeatedly; clients merge by id.
pub async fn get_messages(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(match_id) = path?;
    let Query(query) = query?;
    let m = require_participant(&state, match_id, claims.sub).await?;

    mark_as_read(&state, &m, claims.sub, ReceiptPolicy::IfChanged).await?;

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = u64::from(page - 1) * u64::from(limit);

    let (total, page_rows) = run_db(&state, move |db| {
        let mid = match_id.to_string();
        let total = db.count_messages(&mid)?;
        let page_rows = db.get_messages(&mid, limit, offset)?;
        Ok((total, page_rows))
    })
    .await?;

    // Stored newest-first; clients render oldest-first.
    let mut messages: Vec<Message> = page_rows.into_iter().map(rows::message).collect();
    messages.reverse();

    let total_pages = total.div_ceil(u64::from(limit)) as u32;

    Ok(Json(MessageHistoryResponse {
        success: true,
        messages,
        pagination: Pagination {
            current_page: page,
            total_pages,
            total_messages: total,
            has_more: page < total_pages,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_rules() {
        assert!(validate_content("hi", MessageType::Text).is_ok());
        assert!(validate_content("   ", MessageType::Text).is_err());
        assert!(validate_content(&"x".repeat(MAX_CONTENT_CHARS), MessageType::Text).is_ok());
        assert!(validate_content(&"x".repeat(MAX_CONTENT_CHARS + 1), MessageType::Text).is_err());
        // Multi-byte characters count once each.
        assert!(validate_content(&"é".repeat(MAX_CONTENT_CHARS), MessageType::Emoji).is_ok());

        assert!(validate_content("https://cdn.example/p.jpg", MessageType::Image).is_ok());
        assert!(validate_content("data:image/png;base64,AAAA", MessageType::Image).is_err());
    }
}
