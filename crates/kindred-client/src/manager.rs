use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kindred_types::events::{
    LikeReceived, MatchFormed, MessageReceive, ReadReceipt, TypingChanged, UserEvent, user_channel,
};

use crate::error::ClientError;
use crate::transport::{Link, Transport};

/// How many recent message ids are remembered for duplicate suppression.
const RECENT_MESSAGE_IDS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub user_id: Uuid,
    pub token: String,
}

/// Opaque handle returned by [`ConnectionManager::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Live-update callbacks. Every method defaults to a no-op so a component
/// only implements what it renders.
pub trait EventHandler: Send + Sync {
    fn on_message(&self, _event: &MessageReceive) {}
    fn on_typing(&self, _event: &TypingChanged) {}
    fn on_read_receipt(&self, _event: &ReadReceipt) {}
    fn on_match(&self, _event: &MatchFormed) {}
    fn on_like(&self, _event: &LikeReceived) {}
}

fn deliver(handler: &dyn EventHandler, event: &UserEvent) {
    match event {
        UserEvent::MessageReceive(e) => handler.on_message(e),
        UserEvent::TypingChanged(e) => handler.on_typing(e),
        UserEvent::ReadReceipt(e) => handler.on_read_receipt(e),
        UserEvent::MatchFormed(e) => handler.on_match(e),
        UserEvent::LikeReceived(e) => handler.on_like(e),
    }
}

type Callback<T> = Option<Box<dyn Fn(&T) + Send + Sync>>;

/// Closure-based [`EventHandler`].
///
/// ```ignore
/// let handler = Callbacks::new()
///     .on_message(|m| println!("{}: {}", m.sender_id, m.content))
///     .on_typing(|t| println!("{} typing={}", t.user_id, t.is_typing));
/// ```
#[derive(Default)]
pub struct Callbacks {
    message: Callback<MessageReceive>,
    typing: Callback<TypingChanged>,
    read_receipt: Callback<ReadReceipt>,
    matched: Callback<MatchFormed>,
    like: Callback<LikeReceived>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message(mut self, f: impl Fn(&MessageReceive) + Send + Sync + 'static) -> Self {
        self.message = Some(Box::new(f));
        self
    }

    pub fn on_typing(mut self, f: impl Fn(&TypingChanged) + Send + Sync + 'static) -> Self {
        self.typing = Some(Box::new(f));
        self
    }

    pub fn on_read_receipt(mut self, f: impl Fn(&ReadReceipt) + Send + Sync + 'static) -> Self {
        self.read_receipt = Some(Box::new(f));
        self
    }

    pub fn on_match(mut self, f: impl Fn(&MatchFormed) + Send + Sync + 'static) -> Self {
        self.matched = Some(Box::new(f));
        self
    }

    pub fn on_like(mut self, f: impl Fn(&LikeReceived) + Send + Sync + 'static) -> Self {
        self.like = Some(Box::new(f));
        self
    }
}

impl EventHandler for Callbacks {
    fn on_message(&self, event: &MessageReceive) {
        if let Some(f) = &self.message {
            f(event)
        }
    }

    fn on_typing(&self, event: &TypingChanged) {
        if let Some(f) = &self.typing {
            f(event)
        }
    }

    fn on_read_receipt(&self, event: &ReadReceipt) {
        if let Some(f) = &self.read_receipt {
            f(event)
        }
    }

    fn on_match(&self, event: &MatchFormed) {
        if let Some(f) = &self.matched {
            f(event)
        }
    }

    fn on_like(&self, event: &LikeReceived) {
        if let Some(f) = &self.like {
            f(event)
        }
    }
}

/// Bounded set of recently delivered message ids.
#[derive(Default)]
struct RecentIds {
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
}

impl RecentIds {
    /// False if `id` was already seen.
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > RECENT_MESSAGE_IDS {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        true
    }
}

/// State shared between the manager and its dispatch task.
struct Shared {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn EventHandler>>>,
    recent: Mutex<RecentIds>,
    state: watch::Sender<ConnectionState>,
}

impl Shared {
    fn dispatch(&self, event: &UserEvent) {
        if let UserEvent::MessageReceive(m) = event {
            if let Some(id) = m.message_id() {
                if !lock(&self.recent).insert(id) {
                    debug!("Dropping duplicate message {}", id);
                    return;
                }
            }
        }

        // Snapshot so a callback may (un)register without deadlocking.
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for handler in handlers {
            deliver(handler.as_ref(), event);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct LiveConnection {
    user_id: Uuid,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    conn: Option<LiveConnection>,
    /// The most recent attempt, if it failed: (user, reason).
    failure: Option<(Uuid, String)>,
}

/// One realtime connection per user, shared by any number of subscribers.
///
/// Construct once at startup and hand out by reference. `connect` reuses a
/// live connection for the same user and joins an attempt already in
/// flight; the connection closes when the last subscriber disconnects.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    live: tokio::sync::Mutex<Slot>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    /// Completed connection attempts, successful or not.
    attempts: AtomicU64,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            transport,
            live: tokio::sync::Mutex::new(Slot::default()),
            shared: Arc::new(Shared {
                subscribers: RwLock::new(HashMap::new()),
                recent: Mutex::new(RecentIds::default()),
                state,
            }),
            next_id: AtomicU64::new(1),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Register `handler` for `config.user_id`'s events, opening the
    /// connection if needed.
    pub async fn connect(
        &self,
        config: &ConnectConfig,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriberId, ClientError> {
        // Held across the attempt: concurrent callers queue here and then
        // find the connection this one opened, or the error it hit.
        let ticket = self.attempts.load(Ordering::Acquire);
        let mut slot = self.live.lock().await;

        if let Some(current) = slot.conn.as_ref() {
            if current.user_id == config.user_id && !current.task.is_finished() {
                return Ok(self.register(handler));
            }
        }

        if self.attempts.load(Ordering::Acquire) != ticket {
            if let Some((user_id, reason)) = &slot.failure {
                if *user_id == config.user_id {
                    debug!("Sharing failed realtime attempt for {}", user_id);
                    return Err(ClientError::Connect(reason.clone()));
                }
            }
        }

        if let Some(old) = slot.conn.take() {
            if old.user_id != config.user_id {
                info!("Switching realtime identity from {} to {}", old.user_id, config.user_id);
                self.shared
                    .subscribers
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .clear();
            }
            teardown(old).await;
        }

        self.shared.state.send_replace(ConnectionState::Connecting);
        let opened = self.open(config).await;
        self.attempts.fetch_add(1, Ordering::AcqRel);
        match opened {
            Ok(conn) => {
                slot.conn = Some(conn);
                slot.failure = None;
                self.shared.state.send_replace(ConnectionState::Connected);
                Ok(self.register(handler))
            }
            Err(e) => {
                warn!("Realtime connect for {} failed: {}", config.user_id, e);
                slot.failure = Some((config.user_id, e.to_string()));
                self.shared.state.send_replace(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// Remove a subscriber. The connection is closed only when none remain.
    pub async fn disconnect(&self, id: SubscriberId) {
        let mut slot = self.live.lock().await;

        let remaining = {
            let mut subs = self.shared.subscribers.write().unwrap_or_else(|e| e.into_inner());
            subs.remove(&id);
            subs.len()
        };
        if remaining > 0 {
            return;
        }

        if let Some(conn) = slot.conn.take() {
            info!("Last subscriber left, closing realtime connection for {}", conn.user_id);
            teardown(conn).await;
            self.shared.state.send_replace(ConnectionState::Disconnected);
        }
    }

    fn register(&self, handler: Arc<dyn EventHandler>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, handler);
        id
    }

    async fn open(&self, config: &ConnectConfig) -> Result<LiveConnection, ClientError> {
        let channel = user_channel(config.user_id);
        let mut link = self.transport.connect(config).await?;
        if let Err(e) = link.subscribe(&channel).await {
            link.close().await;
            return Err(e);
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_dispatch(link, channel, self.shared.clone(), shutdown_rx));

        Ok(LiveConnection {
            user_id: config.user_id,
            shutdown,
            task,
        })
    }
}

async fn teardown(conn: LiveConnection) {
    let _ = conn.shutdown.send(());
    if let Err(e) = conn.task.await {
        warn!("Dispatch task ended abnormally: {}", e);
    }
}

/// Single reader for the channel: every event fans out to all subscribers.
async fn run_dispatch(
    mut link: Box<dyn Link>,
    channel: String,
    shared: Arc<Shared>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                if let Err(e) = link.unsubscribe(&channel).await {
                    debug!("Unsubscribe from {} failed: {}", channel, e);
                }
                link.close().await;
                return;
            }
            next = link.next_event() => match next {
                Some(event) => shared.dispatch(&event),
                None => {
                    warn!("Realtime connection for {} dropped", channel);
                    shared.state.send_replace(ConnectionState::Disconnected);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_ids_are_bounded() {
        let mut recent = RecentIds::default();
        let first = Uuid::new_v4();
        assert!(recent.insert(first));
        assert!(!recent.insert(first));

        for _ in 0..RECENT_MESSAGE_IDS {
            recent.insert(Uuid::new_v4());
        }
        assert_eq!(recent.ids.len(), RECENT_MESSAGE_IDS);
        // Evicted, so it would be delivered again.
        assert!(recent.insert(first));
    }
}
