use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, MessageType, UserSummary};

const USER_CHANNEL_PREFIX: &str = "user-";

/// Name of a user's personal fanout channel. Every event for a user goes here.
pub fn user_channel(user_id: Uuid) -> String {
    format!("{USER_CHANNEL_PREFIX}{user_id}")
}

/// Inverse of [`user_channel`].
pub fn parse_user_channel(channel: &str) -> Option<Uuid> {
    channel.strip_prefix(USER_CHANNEL_PREFIX)?.parse().ok()
}

/// Events published to a user's channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum UserEvent {
    /// A new message addressed to the channel owner
    #[serde(rename = "message:receive")]
    MessageReceive(MessageReceive),

    /// The other party started or stopped typing
    #[serde(rename = "typing:user_typing")]
    TypingChanged(TypingChanged),

    /// The other party read the channel owner's messages
    #[serde(rename = "message:read_receipt")]
    ReadReceipt(ReadReceipt),

    /// A mutual match was formed
    #[serde(rename = "match:new")]
    MatchFormed(MatchFormed),

    /// Someone liked the channel owner (not yet mutual)
    #[serde(rename = "match:like")]
    LikeReceived(LikeReceived),
}

impl UserEvent {
    /// Wire name of the event, e.g. `message:receive`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageReceive(_) => "message:receive",
            Self::TypingChanged(_) => "typing:user_typing",
            Self::ReadReceipt(_) => "message:read_receipt",
            Self::MatchFormed(_) => "match:new",
            Self::LikeReceived(_) => "match:like",
        }
    }

    /// The payload alone, serialized as JSON.
    pub fn data_json(&self) -> serde_json::Result<String> {
        match self {
            Self::MessageReceive(p) => serde_json::to_string(p),
            Self::TypingChanged(p) => serde_json::to_string(p),
            Self::ReadReceipt(p) => serde_json::to_string(p),
            Self::MatchFormed(p) => serde_json::to_string(p),
            Self::LikeReceived(p) => serde_json::to_string(p),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceive {
    pub match_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    /// Full persisted message, included so the receiver needs no round trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

impl MessageReceive {
    pub fn from_message(message: &Message) -> Self {
        Self {
            match_id: message.match_id,
            sender_id: message.sender_id,
            content: message.content.clone(),
            message_type: message.message_type,
            timestamp: message.created_at,
            message: Some(message.clone()),
        }
    }

    pub fn message_id(&self) -> Option<Uuid> {
        self.message.as_ref().map(|m| m.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingChanged {
    pub match_id: Uuid,
    pub user_id: Uuid,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub match_id: Uuid,
    pub read_by_user_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub id: Uuid,
    pub user: UserSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFormed {
    #[serde(rename = "match")]
    pub matched: MatchSummary,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeReceived {
    pub liker: UserSummary,
    pub timestamp: DateTime<Utc>,
}

/// Frames sent FROM server TO client over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayFrame {
    /// Server confirms successful authentication
    #[serde(rename_all = "camelCase")]
    Ready { user_id: Uuid },

    /// Channel subscription accepted
    Subscribed { channel: String },

    /// An event published on a subscribed channel
    Event { channel: String, event: UserEvent },

    /// A command was refused; the connection stays open
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving events for a channel (only the caller's own)
    Subscribe { channel: String },

    /// Stop receiving events for a channel
    Unsubscribe { channel: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_channel_naming() {
        let id = Uuid::new_v4();
        let channel = user_channel(id);
        assert_eq!(channel, format!("user-{id}"));
        assert_eq!(parse_user_channel(&channel), Some(id));
        assert_eq!(parse_user_channel("match-123"), None);
        assert_eq!(parse_user_channel("user-not-a-uuid"), None);
    }

    #[test]
    fn typing_event_wire_shape() {
        let match_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let event = UserEvent::TypingChanged(TypingChanged {
            match_id,
            user_id,
            is_typing: true,
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "typing:user_typing",
                "data": { "matchId": match_id, "userId": user_id, "isTyping": true }
            })
        );
        assert_eq!(event.name(), "typing:user_typing");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&event.data_json().unwrap()).unwrap(),
            value["data"]
        );
    }

    #[test]
    fn match_formed_uses_match_key() {
        let event = UserEvent::MatchFormed(MatchFormed {
            matched: MatchSummary {
                id: Uuid::new_v4(),
                user: UserSummary {
                    id: Uuid::new_v4(),
                    name: "Ada".into(),
                    image: None,
                },
            },
            timestamp: Utc::now(),
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "match:new");
        assert_eq!(value["data"]["match"]["user"]["name"], "Ada");

        let back: UserEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn gateway_frame_carries_channel_and_event() {
        let frame = GatewayFrame::Event {
            channel: "user-x".into(),
            event: UserEvent::ReadReceipt(ReadReceipt {
                match_id: Uuid::nil(),
                read_by_user_id: Uuid::nil(),
                timestamp: Utc::now(),
            }),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "Event");
        assert_eq!(value["data"]["channel"], "user-x");
        assert_eq!(value["data"]["event"]["event"], "message:read_receipt");
    }
}
