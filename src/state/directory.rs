use std::collections::HashMap;

use crate::channel::ClientChannel;
use crate::{ConnId, UserId};

/// Authoritative mapping of user id to live transport channel.
///
/// At most one channel per user; re-registration replaces the old channel.
/// Cached channel handles elsewhere (call records) must be validated against
/// this table with [`UserDirectory::is_current`] before use.
#[derive(Default)]
pub struct UserDirectory {
    channels: HashMap<UserId, ClientChannel>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `channel` as the user's live channel, returning the channel it
    /// replaced, if any.
    pub fn insert(&mut self, user_id: UserId, channel: ClientChannel) -> Option<ClientChannel> {
        self.channels.insert(user_id, channel)
    }

    pub fn resolve(&self, user_id: &str) -> Option<&ClientChannel> {
        self.channels.get(user_id)
    }

    /// Whether `conn_id` is still the user's live channel.
    pub fn is_current(&self, user_id: &str, conn_id: &ConnId) -> bool {
        self.channels
            .get(user_id)
            .map(|ch| ch.conn_id == *conn_id)
            .unwrap_or(false)
    }

    /// Remove the mapping, but only if the closing connection is still the
    /// bound one; a re-registration may have superseded it.
    pub fn unbind(&mut self, user_id: &str, conn_id: &ConnId) -> bool {
        if self.is_current(user_id, conn_id) {
            self.channels.remove(user_id);
            true
        } else {
            false
        }
    }

    pub fn users(&self) -> impl Iterator<Item = &UserId> {
        self.channels.keys()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
