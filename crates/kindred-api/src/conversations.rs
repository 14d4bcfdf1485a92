use std::cmp::Ordering;

use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::debug;
use uuid::Uuid;

use kindred_db::Database;
use kindred_types::api::{Claims, ConversationsResponse};
use kindred_types::models::{ConversationStatus, ConversationView};

use crate::auth::{AppState, run_db};
use crate::error::ApiError;
use crate::rows;

/// Build the viewer's conversation list: every active match with its
/// latest message and unread count, plus outgoing likes still waiting on
/// the other side.
pub fn list_conversations(db: &Database, viewer: Uuid) -> anyhow::Result<Vec<ConversationView>> {
    let vid = viewer.to_string();
    let mut views = Vec::new();

    for row in db.get_active_matches(&vid)? {
        let m = rows::mutual_match(row);
        let Some(other_id) = m.other(viewer) else { continue };
        let mid = m.id.to_string();

        let Some(other) = db.get_user(&other_id.to_string())? else {
            debug!("Match {} has no profile for {}, leaving it out", m.id, other_id);
            continue;
        };

        views.push(ConversationView {
            match_id: Some(m.id),
            other_user: rows::user_summary(other),
            matched_at: m.matched_at,
            last_message_at: m.last_message_at,
            latest_message: db.get_latest_message(&mid)?.map(rows::latest_message),
            unread_count: db.count_unread(&mid, &vid)?,
            seen_by_me: m.seen_by(viewer),
            status: ConversationStatus::Accepted,
        });
    }

    for like in db.get_pending_likes(&vid)? {
        let Some(target) = db.get_user(&like.target_id)? else {
            debug!("Pending like has no profile for {}, leaving it out", like.target_id);
            continue;
        };
        views.push(ConversationView {
            match_id: None,
            other_user: rows::user_summary(target),
            matched_at: rows::parse_timestamp(&like.updated_at, "updated_at"),
            last_message_at: None,
            latest_message: None,
            unread_count: 0,
            seen_by_me: true,
            status: ConversationStatus::Pending,
        });
    }

    sort_conversations(&mut views);
    Ok(views)
}

/// Most recent activity first; conversations without messages go after
/// those with, ordered by when they were formed.
pub fn sort_conversations(views: &mut [ConversationView]) {
    views.sort_by(|a, b| {
        let by_message = match (a.last_message_at, b.last_message_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_message.then_with(|| b.matched_at.cmp(&a.matched_at))
    });
}

/// GET /conversations
pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = claims.sub;
    let conversations = run_db(&state, move |db| list_conversations(db, viewer)).await?;

    Ok(Json(ConversationsResponse {
        success: true,
        conversations,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use kindred_types::models::UserSummary;

    fn view(name: &str, matched_ago: i64, message_ago: Option<i64>) -> ConversationView {
        let now = Utc::now();
        ConversationView {
            match_id: Some(Uuid::new_v4()),
            other_user: UserSummary {
                id: Uuid::new_v4(),
                name: name.into(),
                image: None,
            },
            matched_at: now - Duration::minutes(matched_ago),
            last_message_at: message_ago.map(|m| now - Duration::minutes(m)),
            latest_message: None,
            unread_count: 0,
            seen_by_me: true,
            status: ConversationStatus::Accepted,
        }
    }

    #[test]
    fn messages_first_then_newest_match() {
        let mut views = vec![
            view("quiet-old", 100, None),
            view("chatty-stale", 90, Some(60)),
            view("quiet-new", 5, None),
            view("chatty-fresh", 80, Some(1)),
        ];
        sort_conversations(&mut views);

        let names: Vec<_> = views.iter().map(|v| v.other_user.name.as_str()).collect();
        assert_eq!(names, ["chatty-fresh", "chatty-stale", "quiet-new", "quiet-old"]);
    }

    fn seed(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.upsert_user(&id.to_string(), name, None).unwrap();
        id
    }

    #[test]
    fn accepted_and_pending_are_merged() {
        use kindred_types::models::ActionKind::*;

        let db = Database::open_in_memory().unwrap();
        let me = seed(&db, "me");
        let matched = seed(&db, "matched");
        let waiting = seed(&db, "waiting");
        let skipped = seed(&db, "skipped");

        let (m, w, s, me_s) = (matched.to_string(), waiting.to_string(), skipped.to_string(), me.to_string());
        db.record_action(&me_s, &m, Like).unwrap();
        db.record_action(&m, &me_s, Like).unwrap();
        db.record_action(&me_s, &w, Like).unwrap();
        db.record_action(&me_s, &s, Skip).unwrap();

        let active = db.find_active_match(&me_s, &m).unwrap().unwrap();
        db.insert_message(&Uuid::new_v4().to_string(), &active.id, &m, &me_s, "hey", "text")
            .unwrap()
            .unwrap();

        let views = list_conversations(&db, me).unwrap();
        assert_eq!(views.len(), 2);

        let accepted = &views[0];
        assert_eq!(accepted.other_user.id, matched);
        assert!(accepted.can_message());
        assert_eq!(accepted.unread_count, 1);
        assert_eq!(accepted.latest_message.as_ref().unwrap().content, "hey");
        // The first liker has not seen the new match yet.
        assert!(!accepted.seen_by_me);

        let pending = &views[1];
        assert_eq!(pending.other_user.id, waiting);
        assert_eq!(pending.status, ConversationStatus::Pending);
        assert!(pending.match_id.is_none());
        assert!(!pending.can_message());
    }

    #[test]
    fn entries_without_a_profile_are_left_out() {
        use kindred_types::models::ActionKind::*;

        let db = Database::open_in_memory().unwrap();
        let me = seed(&db, "me");
        let matched = seed(&db, "matched");
        let waiting = seed(&db, "waiting");

        let (m, w, me_s) = (matched.to_string(), waiting.to_string(), me.to_string());
        db.record_action(&me_s, &m, Like).unwrap();
        db.record_action(&m, &me_s, Like).unwrap();
        db.record_action(&me_s, &w, Like).unwrap();
        assert_eq!(list_conversations(&db, me).unwrap().len(), 2);

        // Profiles vanish without the cascade (e.g. an external user purge).
        db.with_conn(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
            conn.execute("DELETE FROM users WHERE id IN (?1, ?2)", [&m, &w])?;
            Ok(())
        })
        .unwrap();

        assert!(list_conversations(&db, me).unwrap().is_empty());
    }
}
