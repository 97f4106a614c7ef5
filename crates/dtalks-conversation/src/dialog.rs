//! Per-user dialog state
//!
//! Holds the FAQ drill-down mode and the last completed exchange used to
//! attribute feedback. Each user's state sits behind its own async mutex so
//! messages from one user are handled one at a time, and idle entries are
//! evicted after a TTL.

use dashmap::DashMap;
use dtalks_core::Label;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Sticky multi-step flow overriding normal routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogMode {
    /// Waiting for a category number
    FaqCategory,
    /// Waiting for a question number
    FaqQuestion,
}

/// The last answered query and its label
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub query: String,
    pub label: Label,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserDialogState {
    pub pending_mode: Option<DialogMode>,
    pub last_exchange: Option<Exchange>,
}

impl UserDialogState {
    pub fn in_faq(&self) -> bool {
        self.pending_mode.is_some()
    }

    /// Remember a completed exchange for later feedback
    pub fn complete(&mut self, query: impl Into<String>, label: Label) {
        self.last_exchange = Some(Exchange {
            query: query.into(),
            label,
        });
    }

    /// Take the exchange feedback should apply to, leaving none behind
    pub fn take_exchange(&mut self) -> Option<Exchange> {
        self.last_exchange.take()
    }

    pub fn is_neutral(&self) -> bool {
        self.pending_mode.is_none() && self.last_exchange.is_none()
    }
}

struct Slot {
    state: Arc<Mutex<UserDialogState>>,
    touched: Instant,
}

/// Keyed store of dialog state with idle eviction
pub struct DialogStateStore {
    slots: DashMap<String, Slot>,
    ttl: Duration,
}

impl DialogStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            ttl,
        }
    }

    /// Lock a user's state for the duration of one message.
    ///
    /// Expired state is reset before it is handed out.
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<UserDialogState> {
        let now = Instant::now();
        let (state, stale) = {
            let mut slot = self.slots.entry(user_id.to_string()).or_insert_with(|| Slot {
                state: Arc::new(Mutex::new(UserDialogState::default())),
                touched: now,
            });
            let stale = now.duration_since(slot.touched) > self.ttl;
            slot.touched = now;
            (Arc::clone(&slot.state), stale)
        };

        let mut guard = state.lock_owned().await;
        if stale {
            debug!(user_id, "Dialog state expired, resetting");
            *guard = UserDialogState::default();
        }
        guard
    }

    /// Copy of a user's state, if any
    pub async fn get(&self, user_id: &str) -> Option<UserDialogState> {
        let state = self.slots.get(user_id).map(|s| Arc::clone(&s.state))?;
        let guard = state.lock().await;
        Some(guard.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Remove idle entries nobody is holding; returns how many went
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            now.duration_since(slot.touched) <= self.ttl || Arc::strong_count(&slot.state) > 1
        });
        before - self.slots.len()
    }
}
