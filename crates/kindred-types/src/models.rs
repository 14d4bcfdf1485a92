use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public profile summary shown next to matches, likes and messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub image: Option<String>,
}

/// A one-sided decision one user made about another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Like,
    Reject,
    Skip,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Reject => "reject",
            Self::Skip => "skip",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "reject" => Some(Self::Reject),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }

    /// Whether an actor whose previous action toward a target was `prev`
    /// may now record `self`.
    pub fn may_follow(self, prev: Option<ActionKind>) -> bool {
        match prev {
            None => true,
            Some(Self::Skip) => self != Self::Skip,
            Some(_) => false,
        }
    }
}

/// A confirmed bidirectional like. The pair is always stored low id first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutualMatch {
    pub id: Uuid,
    pub user_low_id: Uuid,
    pub user_high_id: Uuid,
    pub matched_at: DateTime<Utc>,
    pub is_active: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    pub user_low_seen: bool,
    pub user_high_seen: bool,
}

impl MutualMatch {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.user_low_id == user_id || self.user_high_id == user_id
    }

    /// The participant that is not `viewer`, or `None` if `viewer` is not a participant.
    pub fn other(&self, viewer: Uuid) -> Option<Uuid> {
        if self.user_low_id == viewer {
            Some(self.user_high_id)
        } else if self.user_high_id == viewer {
            Some(self.user_low_id)
        } else {
            None
        }
    }

    pub fn seen_by(&self, viewer: Uuid) -> bool {
        if self.user_low_id == viewer {
            self.user_low_seen
        } else {
            self.user_high_seen
        }
    }
}

/// Order a user pair canonically so one unordered pair has one representation.
///
/// `Uuid`'s ordering is byte-wise, which matches the lexicographic order of
/// the lowercase hyphenated string form.
pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    /// `content` holds a URL or opaque media reference, never inline bytes.
    Image,
    Emoji,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Emoji => "emoji",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "emoji" => Some(Self::Emoji),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub match_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Outgoing like with no mutual match yet. Messaging is disabled.
    Pending,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestMessage {
    pub content: String,
    pub sender_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub message_type: MessageType,
}

/// Per-viewer projection of one connection, recomputed on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub match_id: Option<Uuid>,
    pub other_user: UserSummary,
    pub matched_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub latest_message: Option<LatestMessage>,
    pub unread_count: u64,
    pub seen_by_me: bool,
    pub status: ConversationStatus,
}

impl ConversationView {
    pub fn can_message(&self) -> bool {
        self.status == ConversationStatus::Accepted && self.match_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_pair_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(canonical_pair(a, b), canonical_pair(b, a));

        let (low, high) = canonical_pair(a, b);
        assert!(low.to_string() <= high.to_string());
    }

    #[test]
    fn only_skip_can_be_replaced() {
        use ActionKind::*;

        for next in [Like, Reject, Skip] {
            assert!(next.may_follow(None));
        }
        assert!(Like.may_follow(Some(Skip)));
        assert!(Reject.may_follow(Some(Skip)));
        assert!(!Skip.may_follow(Some(Skip)));

        for prev in [Like, Reject] {
            for next in [Like, Reject, Skip] {
                assert!(!next.may_follow(Some(prev)), "{prev:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn other_participant() {
        let (low, high) = canonical_pair(Uuid::new_v4(), Uuid::new_v4());
        let m = MutualMatch {
            id: Uuid::new_v4(),
            user_low_id: low,
            user_high_id: high,
            matched_at: Utc::now(),
            is_active: true,
            last_message_at: None,
            user_low_seen: true,
            user_high_seen: false,
        };

        assert_eq!(m.other(low), Some(high));
        assert_eq!(m.other(high), Some(low));
        assert_eq!(m.other(Uuid::new_v4()), None);
        assert!(m.seen_by(low));
        assert!(!m.seen_by(high));
    }
}
