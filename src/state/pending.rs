use std::collections::{HashMap, VecDeque};

use crate::events::ServerEvent;
use crate::UserId;

/// Per-user mailbox for events emitted while the user had no live channel.
///
/// Queues are created lazily, kept FIFO across event kinds, and removed when
/// drained. Unbounded in the baseline; memory is reclaimed on reconnect.
#[derive(Default)]
pub struct PendingSignals {
    queues: HashMap<UserId, VecDeque<ServerEvent>>,
}

impl PendingSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, user_id: &str, event: ServerEvent) {
        self.queues
            .entry(user_id.to_string())
            .or_default()
            .push_back(event);
    }

    /// Remove and return the user's queue in insertion order.
    pub fn drain(&mut self, user_id: &str) -> Vec<ServerEvent> {
        self.queues
            .remove(user_id)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn queued_for(&self, user_id: &str) -> usize {
        self.queues.get(user_id).map(|q| q.len()).unwrap_or(0)
    }
}
