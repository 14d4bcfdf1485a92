use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use kindred_types::events::{
    LikeReceived, MatchFormed, MatchSummary, MessageReceive, ReadReceipt, TypingChanged, UserEvent,
};
use kindred_types::models::{Message, UserSummary};

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("publish request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("publish rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("fanout transport unavailable: {0}")]
    Unavailable(String),
}

/// A pub/sub transport that delivers an event to every active session of a
/// user through that user's personal channel (`user-<id>`).
///
/// Publishing is best-effort. Implementations must be safe to call
/// concurrently from many request handlers.
#[async_trait]
pub trait Fanout: Send + Sync {
    async fn publish(&self, user_id: Uuid, event: &UserEvent) -> Result<(), FanoutError>;
}

/// Translates domain happenings into per-user channel publishes.
///
/// Every event goes to the recipient's personal channel only. A failed
/// publish is logged and returned to the caller; nothing is retried and
/// nothing already persisted is rolled back.
#[derive(Clone)]
pub struct Notifier {
    fanout: Arc<dyn Fanout>,
}

impl Notifier {
    pub fn new(fanout: Arc<dyn Fanout>) -> Self {
        Self { fanout }
    }

    pub async fn publish(&self, recipient: Uuid, event: UserEvent) -> Result<(), FanoutError> {
        match self.fanout.publish(recipient, &event).await {
            Ok(()) => {
                debug!("Published {} to user {}", event.name(), recipient);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to publish {} to user {}: {}", event.name(), recipient, e);
                Err(e)
            }
        }
    }

    /// Push a persisted message to its receiver. The sender is never echoed.
    pub async fn message_received(&self, message: &Message) -> Result<(), FanoutError> {
        self.publish(
            message.receiver_id,
            UserEvent::MessageReceive(MessageReceive::from_message(message)),
        )
        .await
    }

    pub async fn typing_changed(
        &self,
        receiver_id: Uuid,
        match_id: Uuid,
        typist_id: Uuid,
        is_typing: bool,
    ) -> Result<(), FanoutError> {
        self.publish(
            receiver_id,
            UserEvent::TypingChanged(TypingChanged {
                match_id,
                user_id: typist_id,
                is_typing,
            }),
        )
        .await
    }

    pub async fn read_receipt(&self, recipient: Uuid, match_id: Uuid, reader_id: Uuid) -> Result<(), FanoutError> {
        self.publish(
            recipient,
            UserEvent::ReadReceipt(ReadReceipt {
                match_id,
                read_by_user_id: reader_id,
                timestamp: Utc::now(),
            }),
        )
        .await
    }

    /// Tell both sides of a new match, each with the other's summary.
    /// Returns true only if both publishes succeeded.
    pub async fn match_formed(&self, match_id: Uuid, a: &UserSummary, b: &UserSummary) -> bool {
        let timestamp = Utc::now();
        let to_a = UserEvent::MatchFormed(MatchFormed {
            matched: MatchSummary { id: match_id, user: b.clone() },
            timestamp,
        });
        let to_b = UserEvent::MatchFormed(MatchFormed {
            matched: MatchSummary { id: match_id, user: a.clone() },
            timestamp,
        });

        let (ra, rb) = tokio::join!(self.publish(a.id, to_a), self.publish(b.id, to_b));
        ra.is_ok() && rb.is_ok()
    }

    pub async fn like_received(&self, target_id: Uuid, liker: &UserSummary) -> Result<(), FanoutError> {
        self.publish(
            target_id,
            UserEvent::LikeReceived(LikeReceived {
                liker: liker.clone(),
                timestamp: Utc::now(),
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(Uuid, UserEvent)>>,
        fail_for: Option<Uuid>,
    }

    #[async_trait]
    impl Fanout for Recording {
        async fn publish(&self, user_id: Uuid, event: &UserEvent) -> Result<(), FanoutError> {
            if self.fail_for == Some(user_id) {
                return Err(FanoutError::Unavailable("down".into()));
            }
            self.sent.lock().unwrap().push((user_id, event.clone()));
            Ok(())
        }
    }

    fn summary(name: &str) -> UserSummary {
        UserSummary {
            id: Uuid::new_v4(),
            name: name.into(),
            image: None,
        }
    }

    #[tokio::test]
    async fn match_formed_sends_each_side_the_other() {
        let rec = Arc::new(Recording::default());
        let notifier = Notifier::new(rec.clone());
        let (a, b) = (summary("a"), summary("b"));
        let match_id = Uuid::new_v4();

        assert!(notifier.match_formed(match_id, &a, &b).await);

        let sent = rec.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        for (recipient, event) in sent.iter() {
            let UserEvent::MatchFormed(formed) = event else {
                panic!("unexpected event {event:?}");
            };
            assert_eq!(formed.matched.id, match_id);
            let expected = if *recipient == a.id { &b } else { &a };
            assert_eq!(&formed.matched.user, expected);
        }
    }

    #[tokio::test]
    async fn message_goes_to_receiver_only() {
        let rec = Arc::new(Recording::default());
        let notifier = Notifier::new(rec.clone());
        let message = Message {
            id: Uuid::new_v4(),
            match_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            content: "hi".into(),
            message_type: Default::default(),
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        };

        notifier.message_received(&message).await.unwrap();

        let sent = rec.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, message.receiver_id);
        match &sent[0].1 {
            UserEvent::MessageReceive(m) => assert_eq!(m.message_id(), Some(message.id)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn failures_are_reported_not_swallowed() {
        let b = summary("b");
        let rec = Arc::new(Recording {
            fail_for: Some(b.id),
            ..Default::default()
        });
        let notifier = Notifier::new(rec.clone());
        let a = summary("a");

        assert!(notifier.like_received(b.id, &a).await.is_err());
        assert!(!notifier.match_formed(Uuid::new_v4(), &a, &b).await);
        // a's half still went out
        assert_eq!(rec.sent.lock().unwrap().len(), 1);
    }
}
