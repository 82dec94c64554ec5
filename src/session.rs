//! Short-lived conversation history keyed by session id.
//!
//! Clients that pass a `session_id` (or a `user_id`) only send the new turn;
//! the gateway prepends what it remembers. Sessions idle longer than the TTL
//! are evicted, both lazily on read and by the maintenance tick.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::proxy::types::Message;

#[derive(Debug, Clone)]
struct Session {
    messages: Vec<Message>,
    last_activity_at: DateTime<Utc>,
}

/// TTL-bounded session cache.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            clock,
        }
    }

    /// History for a session, creating it if absent and marking it active.
    pub fn get(&self, session_id: &str) -> Vec<Message> {
        self.sweep();
        let now = self.clock.now();
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                messages: Vec::new(),
                last_activity_at: now,
            });
        entry.last_activity_at = now;
        entry.messages.clone()
    }

    /// Append turns to a session's history.
    pub fn append(&self, session_id: &str, messages: impl IntoIterator<Item = Message>) {
        let now = self.clock.now();
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                messages: Vec::new(),
                last_activity_at: now,
            });
        entry.messages.extend(messages);
        entry.last_activity_at = now;
    }

    /// Forget a session. Clearing an unknown id is not an error.
    pub fn clear(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            tracing::debug!(session = %session_id, "Session cleared");
        }
    }

    /// Evict every session idle longer than the TTL. Returns how many went.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now - session.last_activity_at <= self.ttl);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Expired sessions evicted");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
