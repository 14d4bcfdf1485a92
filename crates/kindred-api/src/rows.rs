//! Conversions from SQLite rows to wire models.
//!
//! A malformed column is logged and replaced by a default rather than
//! failing the whole listing.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use kindred_db::models::{MessageRow, MutualMatchRow, UserRow};
use kindred_types::models::{LatestMessage, Message, MessageType, MutualMatch, UserSummary};

pub fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub fn parse_timestamp(raw: &str, what: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's CURRENT_TIMESTAMP has no timezone; treat it as UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt {} '{}': {}", what, raw, e);
            DateTime::default()
        })
}

fn parse_message_type(raw: &str, message_id: &str) -> MessageType {
    MessageType::parse(raw).unwrap_or_else(|| {
        warn!("Unknown message_type '{}' on message '{}'", raw, message_id);
        MessageType::Text
    })
}

pub fn user_summary(row: UserRow) -> UserSummary {
    UserSummary {
        id: parse_uuid(&row.id, "user id"),
        name: row.name,
        image: row.image,
    }
}

pub fn mutual_match(row: MutualMatchRow) -> MutualMatch {
    MutualMatch {
        id: parse_uuid(&row.id, "match id"),
        user_low_id: parse_uuid(&row.user_low_id, "user_low_id"),
        user_high_id: parse_uuid(&row.user_high_id, "user_high_id"),
        matched_at: parse_timestamp(&row.matched_at, "matched_at"),
        is_active: row.is_active,
        last_message_at: row
            .last_message_at
            .as_deref()
            .map(|ts| parse_timestamp(ts, "last_message_at")),
        user_low_seen: row.user_low_seen,
        user_high_seen: row.user_high_seen,
    }
}

pub fn message(row: MessageRow) -> Message {
    Message {
        id: parse_uuid(&row.id, "message id"),
        match_id: parse_uuid(&row.match_id, "match_id"),
        sender_id: parse_uuid(&row.sender_id, "sender_id"),
        receiver_id: parse_uuid(&row.receiver_id, "receiver_id"),
        message_type: parse_message_type(&row.message_type, &row.id),
        is_read: row.is_read,
        read_at: row.read_at.as_deref().map(|ts| parse_timestamp(ts, "read_at")),
        created_at: parse_timestamp(&row.created_at, "created_at"),
        content: row.content,
    }
}

pub fn latest_message(row: MessageRow) -> LatestMessage {
    let m = message(row);
    LatestMessage {
        content: m.content,
        sender_id: m.sender_id,
        created_at: m.created_at,
        message_type: m.message_type,
    }
}
