use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use kindred_types::events::{MatchSummary, ReadReceipt, UserEvent};
use kindred_types::models::{Message, UserSummary};

/// Local view of one user's conversations, fed by pushed events, the
/// sender's own sends, and periodic history fetches.
///
/// Everything is keyed by message id, so the same message arriving through
/// any combination of those paths is stored once. Events may arrive in any
/// order across channels; a read receipt for messages not yet known is kept
/// and applied when they show up.
pub struct ConversationStore {
    me: Uuid,
    threads: HashMap<Uuid, Vec<Message>>,
    /// (match, reader) -> latest receipt time
    receipts: HashMap<(Uuid, Uuid), DateTime<Utc>>,
    typing: HashSet<(Uuid, Uuid)>,
    likes: Vec<UserSummary>,
    new_matches: Vec<MatchSummary>,
}

impl ConversationStore {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            threads: HashMap::new(),
            receipts: HashMap::new(),
            typing: HashSet::new(),
            likes: Vec::new(),
            new_matches: Vec::new(),
        }
    }

    /// Apply a pushed event. Returns whether anything visible changed.
    pub fn apply(&mut self, event: &UserEvent) -> bool {
        match event {
            UserEvent::MessageReceive(m) => match &m.message {
                Some(message) => {
                    self.typing.remove(&(message.match_id, message.sender_id));
                    self.upsert(message.clone())
                }
                None => {
                    debug!("message:receive without a message body in {}, waiting for refetch", m.match_id);
                    false
                }
            },
            UserEvent::TypingChanged(t) => {
                if t.is_typing {
                    self.typing.insert((t.match_id, t.user_id))
                } else {
                    self.typing.remove(&(t.match_id, t.user_id))
                }
            }
            UserEvent::ReadReceipt(r) => self.apply_receipt(r),
            UserEvent::MatchFormed(f) => {
                if self.new_matches.iter().any(|m| m.id == f.matched.id) {
                    return false;
                }
                self.new_matches.push(f.matched.clone());
                true
            }
            UserEvent::LikeReceived(l) => {
                if self.likes.iter().any(|u| u.id == l.liker.id) {
                    return false;
                }
                self.likes.push(l.liker.clone());
                true
            }
        }
    }

    /// Optimistically show a message this user just sent, as returned by the
    /// server. The server never echoes it back, but a duplicate is harmless.
    pub fn append_sent(&mut self, message: Message) -> bool {
        self.upsert(message)
    }

    /// Merge a fetched page into the thread. Never drops local messages.
    pub fn merge_history(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        messages.into_iter().map(|m| self.upsert(m)).filter(|added| *added).count()
    }

    /// Mirror a server-side mark-as-read after viewing a thread.
    pub fn mark_thread_read(&mut self, match_id: Uuid) -> u64 {
        let now = Utc::now();
        let me = self.me;
        let mut marked = 0;
        for m in self.threads.get_mut(&match_id).into_iter().flatten() {
            if m.receiver_id == me && !m.is_read {
                m.is_read = true;
                m.read_at = Some(now);
                marked += 1;
            }
        }
        marked
    }

    pub fn messages(&self, match_id: Uuid) -> &[Message] {
        self.threads.get(&match_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn unread_count(&self, match_id: Uuid) -> usize {
        self.messages(match_id)
            .iter()
            .filter(|m| m.receiver_id == self.me && !m.is_read)
            .count()
    }

    pub fn total_unread(&self) -> usize {
        self.threads.keys().map(|id| self.unread_count(*id)).sum()
    }

    pub fn is_typing(&self, match_id: Uuid, user_id: Uuid) -> bool {
        self.typing.contains(&(match_id, user_id))
    }

    pub fn likes(&self) -> &[UserSummary] {
        &self.likes
    }

    pub fn new_matches(&self) -> &[MatchSummary] {
        &self.new_matches
    }

    /// The user opened the "new connections" view.
    pub fn clear_new_matches(&mut self) {
        self.new_matches.clear();
    }

    fn apply_receipt(&mut self, r: &ReadReceipt) -> bool {
        let at = self
            .receipts
            .entry((r.match_id, r.read_by_user_id))
            .and_modify(|ts| *ts = (*ts).max(r.timestamp))
            .or_insert(r.timestamp);
        let at = *at;

        let mut changed = false;
        for m in self.threads.get_mut(&r.match_id).into_iter().flatten() {
            changed |= mark_if_covered(m, r.read_by_user_id, at);
        }
        changed
    }

    /// Insert or update by id, keeping the thread ordered by creation time.
    fn upsert(&mut self, mut message: Message) -> bool {
        let reader = message.receiver_id;
        if let Some(at) = self.receipts.get(&(message.match_id, reader)) {
            mark_if_covered(&mut message, reader, *at);
        }

        let thread = self.threads.entry(message.match_id).or_default();
        if let Some(existing) = thread.iter_mut().find(|m| m.id == message.id) {
            // Read state only moves forward.
            if message.is_read && !existing.is_read {
                existing.is_read = true;
                existing.read_at = message.read_at;
                return true;
            }
            return false;
        }

        let key = (message.created_at, message.id);
        let pos = thread.partition_point(|m| (m.created_at, m.id) < key);
        thread.insert(pos, message);
        true
    }
}

fn mark_if_covered(m: &mut Message, reader: Uuid, at: DateTime<Utc>) -> bool {
    if m.receiver_id == reader && !m.is_read && m.created_at <= at {
        m.is_read = true;
        m.read_at = Some(at);
        return true;
    }
    false
}
