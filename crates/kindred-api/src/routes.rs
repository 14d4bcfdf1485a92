use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{conversations, matches, messages, signals};

/// Every REST route. All of them require a valid bearer token.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/matches", post(matches::post_action).get(matches::list_matches))
        .route("/matches/{match_id}", delete(matches::unmatch))
        .route("/matches/{match_id}/seen", post(matches::mark_seen))
        .route("/conversations", get(conversations::get_conversations))
        .route("/messages/send", post(messages::send_message))
        .route("/messages/{match_id}", get(messages::get_messages))
        .route("/typing", post(signals::typing))
        .route("/read-receipt", post(signals::read_receipt))
        .route("/account", delete(auth::delete_account))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
