use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::ClientError;

/// Quiet period after the last keystroke before "stopped typing" is sent.
pub const TYPING_IDLE: Duration = Duration::from_secs(2);

/// Where typing signals go. [`crate::ApiClient`] posts them to `/typing`.
#[async_trait]
pub trait TypingSignal: Send + Sync + 'static {
    async fn set_typing(&self, match_id: Uuid, receiver_id: Uuid, is_typing: bool) -> Result<(), ClientError>;
}

#[derive(Default)]
struct State {
    typing: bool,
    /// Bumped on every keystroke or clear; a pending idle timer only fires
    /// if nothing happened since it was armed.
    generation: u64,
}

/// Debounces keystrokes in one conversation into start/stop signals.
pub struct TypingNotifier<S: TypingSignal> {
    signal: Arc<S>,
    match_id: Uuid,
    receiver_id: Uuid,
    state: Arc<Mutex<State>>,
}

impl<S: TypingSignal> TypingNotifier<S> {
    pub fn new(signal: Arc<S>, match_id: Uuid, receiver_id: Uuid) -> Self {
        Self {
            signal,
            match_id,
            receiver_id,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn is_typing(&self) -> bool {
        self.state.lock().map(|s| s.typing).unwrap_or(false)
    }

    /// Send "typing" on the first keystroke of a burst and re-arm the idle timer.
    pub async fn keystroke(&self) {
        let (started, generation) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.generation += 1;
            let started = !std::mem::replace(&mut state.typing, true);
            (started, state.generation)
        };

        if started {
            self.send(true).await;
        }

        let signal = self.signal.clone();
        let state = self.state.clone();
        let (match_id, receiver_id) = (self.match_id, self.receiver_id);
        tokio::spawn(async move {
            tokio::time::sleep(TYPING_IDLE).await;
            let expired = {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                let expired = state.generation == generation && state.typing;
                if expired {
                    state.typing = false;
                }
                expired
            };
            if expired {
                if let Err(e) = signal.set_typing(match_id, receiver_id, false).await {
                    debug!("Typing stop for {} not delivered: {}", match_id, e);
                }
            }
        });
    }

    /// Input lost focus.
    pub async fn blur(&self) {
        self.clear().await;
    }

    /// The message was sent.
    pub async fn sent(&self) {
        self.clear().await;
    }

    async fn clear(&self) {
        let was_typing = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.generation += 1;
            std::mem::replace(&mut state.typing, false)
        };
        if was_typing {
            self.send(false).await;
        }
    }

    async fn send(&self, is_typing: bool) {
        if let Err(e) = self.signal.set_typing(self.match_id, self.receiver_id, is_typing).await {
            debug!("Typing signal for {} not delivered: {}", self.match_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorded(Mutex<Vec<bool>>);

    #[async_trait]
    impl TypingSignal for Recorded {
        async fn set_typing(&self, _: Uuid, _: Uuid, is_typing: bool) -> Result<(), ClientError> {
            self.0.lock().unwrap().push(is_typing);
            Ok(())
        }
    }

    fn notifier() -> (Arc<Recorded>, TypingNotifier<Recorded>) {
        let rec = Arc::new(Recorded::default());
        let n = TypingNotifier::new(rec.clone(), Uuid::new_v4(), Uuid::new_v4());
        (rec, n)
    }

    #[tokio::test(start_paused = true)]
    async fn one_start_per_burst_then_stop_after_idle() {
        let (rec, n) = notifier();

        n.keystroke().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        n.keystroke().await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        // 1.5s since the last keystroke: still typing.
        assert_eq!(*rec.0.lock().unwrap(), [true]);
        assert!(n.is_typing());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*rec.0.lock().unwrap(), [true, false]);
        assert!(!n.is_typing());

        // A new burst starts again.
        n.keystroke().await;
        assert_eq!(*rec.0.lock().unwrap(), [true, false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn send_and_blur_clear_immediately_once() {
        let (rec, n) = notifier();

        n.keystroke().await;
        n.sent().await;
        assert_eq!(*rec.0.lock().unwrap(), [true, false]);

        // The pending idle timer must not send a second stop.
        tokio::time::sleep(TYPING_IDLE * 2).await;
        n.blur().await;
        assert_eq!(*rec.0.lock().unwrap(), [true, false]);
    }
}
