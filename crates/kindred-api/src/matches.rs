use axum::{
    Extension, Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    response::IntoResponse,
};
use tracing::{debug, info};
use uuid::Uuid;

use kindred_db::RecordOutcome;
use kindred_types::api::{Claims, MatchListEntry, MatchListResponse, RecordActionRequest, RecordActionResponse};
use kindred_types::events::MatchSummary;
use kindred_types::models::{ActionKind, MutualMatch};

use crate::auth::{AppState, run_db};
use crate::error::ApiError;
use crate::rows;

/// Record `actor`'s decision about `target_id` and run the notification
/// side effects: `match:new` to both sides when this formed the match,
/// `match:like` to the target for a one-sided like.
pub async fn record_action(
    state: &AppState,
    actor: &Claims,
    target_id: Uuid,
    action: ActionKind,
) -> Result<RecordActionResponse, ApiError> {
    if target_id == actor.sub {
        return Err(ApiError::Validation("Cannot act on yourself".into()));
    }

    let actor_id = actor.sub.to_string();
    let (target, outcome) = run_db(state, move |db| {
        let target = db.get_user(&target_id.to_string())?;
        let outcome = match target {
            Some(_) => Some(db.record_action(&actor_id, &target_id.to_string(), action)?),
            None => None,
        };
        Ok((target, outcome))
    })
    .await?;

    let (Some(target), Some(outcome)) = (target, outcome) else {
        return Err(ApiError::NotFound("User"));
    };
    let target = rows::user_summary(target);

    let (mutual, created) = match outcome {
        RecordOutcome::AlreadyActed(prev) => {
            debug!("{} already {} {}", actor.sub, prev.as_str(), target_id);
            return Err(ApiError::AlreadyActed);
        }
        RecordOutcome::Recorded { mutual, created } => (mutual.map(rows::mutual_match), created),
    };

    let pushed = match &mutual {
        Some(m) if created => {
            info!("{} and {} matched ({})", actor.sub, target_id, m.id);
            state.notifier.match_formed(m.id, &actor.summary(), &target).await
        }
        None if action == ActionKind::Like => state
            .notifier
            .like_received(target_id, &actor.summary())
            .await
            .is_ok(),
        _ => true,
    };

    Ok(RecordActionResponse {
        success: true,
        matched: mutual.is_some(),
        mutual_match: mutual.map(|m| MatchSummary { id: m.id, user: target }),
        pushed,
    })
}

/// POST /matches
pub async fn post_action(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<RecordActionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let resp = record_action(&state, &claims, req.target_user_id, req.action).await?;
    Ok(Json(resp))
}

/// GET /matches: the caller's active matches, newest first.
pub async fn list_matches(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = claims.sub;
    let matches = run_db(&state, move |db| {
        let mut entries = Vec::new();
        for row in db.get_active_matches(&viewer.to_string())? {
            let m = rows::mutual_match(row);
            let Some(other_id) = m.other(viewer) else { continue };
            let Some(user) = db.get_user(&other_id.to_string())?.map(rows::user_summary) else {
                debug!("Match {} has no profile for {}, leaving it out", m.id, other_id);
                continue;
            };
            entries.push(MatchListEntry {
                id: m.id,
                matched_at: m.matched_at,
                last_message_at: m.last_message_at,
                seen: m.seen_by(viewer),
                user,
            });
        }
        Ok(entries)
    })
    .await?;

    Ok(Json(MatchListResponse { matches }))
}

/// Load an active match the caller takes part in.
/// Missing or inactive is 404; someone else's match is 403.
pub async fn require_participant(state: &AppState, match_id: Uuid, viewer: Uuid) -> Result<MutualMatch, ApiError> {
    let row = run_db(state, move |db| db.get_match(&match_id.to_string())).await?;
    let m = row
        .map(rows::mutual_match)
        .filter(|m| m.is_active)
        .ok_or(ApiError::NotFound("Match"))?;

    if !m.involves(viewer) {
        return Err(ApiError::Forbidden("Not a participant in this match"));
    }
    Ok(m)
}

/// POST /matches/{match_id}/seen
pub async fn mark_seen(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(match_id) = path?;
    let m = require_participant(&state, match_id, claims.sub).await?;
    let viewer = claims.sub.to_string();
    run_db(&state, move |db| db.mark_match_seen(&m.id.to_string(), &viewer)).await?;

    Ok(Json(serde_json::json!({ "success": true })))
}

/// DELETE /matches/{match_id}: unmatch. Messaging stops; history is kept.
pub async fn unmatch(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(match_id) = path?;
    let m = require_participant(&state, match_id, claims.sub).await?;
    let deactivated = run_db(&state, move |db| db.deactivate_match(&m.id.to_string())).await?;
    if !deactivated {
        return Err(ApiError::NotFound("Match"));
    }

    info!("{} unmatched {}", claims.sub, match_id);
    Ok(Json(serde_json::json!({ "success": true })))
}
