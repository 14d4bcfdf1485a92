use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use kindred_types::events::{GatewayFrame, UserEvent, user_channel};

use crate::fanout::{Fanout, FanoutError};

/// Per-user buffer. A session that falls further behind than this skips
/// ahead and recovers the gap by re-fetching.
const CHANNEL_CAPACITY: usize = 256;

/// In-process fanout: one broadcast channel per user, shared by every
/// gateway session (tab, device) that user has open.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// user_id -> sender of pre-serialized `GatewayFrame::Event` JSON
    channels: RwLock<HashMap<Uuid, broadcast::Sender<Arc<str>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Attach a session to a user's channel.
    pub async fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<Arc<str>> {
        let mut channels = self.inner.channels.write().await;
        channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop the user's channel once its last session has dropped its receiver.
    pub async fn release(&self, user_id: Uuid) {
        let mut channels = self.inner.channels.write().await;
        if channels.get(&user_id).is_some_and(|tx| tx.receiver_count() == 0) {
            channels.remove(&user_id);
        }
    }

    /// Number of sessions currently subscribed to a user's channel.
    pub async fn session_count(&self, user_id: Uuid) -> usize {
        self.inner
            .channels
            .read()
            .await
            .get(&user_id)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Deliver an event to every session of `user_id`. Returns how many
    /// sessions received it; zero means the user is offline, which is not
    /// an error.
    pub async fn send_to_user(&self, user_id: Uuid, event: &UserEvent) -> Result<usize, FanoutError> {
        let frame = GatewayFrame::Event {
            channel: user_channel(user_id),
            event: event.clone(),
        };
        let json: Arc<str> = serde_json::to_string(&frame)?.into();

        let channels = self.inner.channels.read().await;
        Ok(channels
            .get(&user_id)
            .and_then(|tx| tx.send(json).ok())
            .unwrap_or(0))
    }
}

#[async_trait]
impl Fanout for Dispatcher {
    async fn publish(&self, user_id: Uuid, event: &UserEvent) -> Result<(), FanoutError> {
        self.send_to_user(user_id, event).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_types::events::TypingChanged;

    fn typing(user_id: Uuid) -> UserEvent {
        UserEvent::TypingChanged(TypingChanged {
            match_id: Uuid::new_v4(),
            user_id,
            is_typing: true,
        })
    }

    #[tokio::test]
    async fn every_session_of_the_user_receives() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let mut tab1 = dispatcher.subscribe(alice).await;
        let mut tab2 = dispatcher.subscribe(alice).await;
        let mut other = dispatcher.subscribe(bob).await;

        let delivered = dispatcher.send_to_user(alice, &typing(bob)).await.unwrap();
        assert_eq!(delivered, 2);

        for rx in [&mut tab1, &mut tab2] {
            let json = rx.recv().await.unwrap();
            let frame: GatewayFrame = serde_json::from_str(&json).unwrap();
            match frame {
                GatewayFrame::Event { channel, .. } => assert_eq!(channel, user_channel(alice)),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_user_is_not_an_error() {
        let dispatcher = Dispatcher::new();
        let nobody = Uuid::new_v4();
        assert_eq!(dispatcher.send_to_user(nobody, &typing(nobody)).await.unwrap(), 0);
        assert!(dispatcher.publish(nobody, &typing(nobody)).await.is_ok());
    }

    #[tokio::test]
    async fn release_only_after_last_session() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let rx1 = dispatcher.subscribe(user).await;
        let rx2 = dispatcher.subscribe(user).await;
        assert_eq!(dispatcher.session_count(user).await, 2);

        drop(rx1);
        dispatcher.release(user).await;
        assert_eq!(dispatcher.session_count(user).await, 1);

        drop(rx2);
        dispatcher.release(user).await;
        assert_eq!(dispatcher.session_count(user).await, 0);
        assert!(dispatcher.inner.channels.read().await.is_empty());
    }
}
