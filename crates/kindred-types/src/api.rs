use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::MatchSummary;
use crate::models::{ActionKind, ConversationView, Message, MessageType, UserSummary};

// -- JWT Claims --

/// JWT claims shared across kindred-api (REST middleware) and kindred-gateway
/// (WebSocket authentication). Issued by the external identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
    pub exp: usize,
}

impl Claims {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.sub,
            name: self.name.clone(),
            image: self.picture.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// -- Matches --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecordActionRequest {
    pub target_user_id: Uuid,
    pub action: ActionKind,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordActionResponse {
    pub success: bool,
    /// Whether this action formed a mutual match.
    #[serde(rename = "match")]
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutual_match: Option<MatchSummary>,
    /// Whether the `match:new` / `match:like` notification went out. True
    /// when the action notifies nobody (skip, reject, one-sided repeat).
    pub pushed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchListEntry {
    pub id: Uuid,
    pub matched_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub user: UserSummary,
    pub seen: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MatchListResponse {
    pub matches: Vec<MatchListEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationsResponse {
    pub success: bool,
    pub conversations: Vec<ConversationView>,
}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    pub receiver_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: Message,
    /// Whether the push to the receiver's channel succeeded. The message is
    /// stored either way.
    pub pushed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_messages: u64,
    pub has_more: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageHistoryResponse {
    pub success: bool,
    /// Oldest first.
    pub messages: Vec<Message>,
    pub pagination: Pagination,
}

// -- Signals --
//
// Unknown fields are tolerated here: older clients also send `senderId`,
// which the server derives from the match instead.

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub match_id: Uuid,
    pub receiver_id: Uuid,
    pub is_typing: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptRequest {
    pub match_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignalResponse {
    pub success: bool,
    pub pushed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadReceiptResponse {
    pub success: bool,
    /// Number of messages that changed from unread to read.
    pub marked: u64,
    pub pushed: bool,
}
