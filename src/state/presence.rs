use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{CallId, UserId};

/// A user's availability as the call-session manager sees it, independent of
/// transport liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceStatus {
    Offline,
    Available,
    Ringing,
    Busy,
    InCall,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Offline => "offline",
            PresenceStatus::Available => "available",
            PresenceStatus::Ringing => "ringing",
            PresenceStatus::Busy => "busy",
            PresenceStatus::InCall => "in-call",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "offline" => Some(PresenceStatus::Offline),
            "available" => Some(PresenceStatus::Available),
            "ringing" => Some(PresenceStatus::Ringing),
            "busy" => Some(PresenceStatus::Busy),
            "in-call" => Some(PresenceStatus::InCall),
            _ => None,
        }
    }

    /// `ringing` and `in-call` always name a live call; `busy` does when the
    /// user is the caller of an initiated call.
    pub fn is_call_bound(&self) -> bool {
        matches!(
            self,
            PresenceStatus::Ringing | PresenceStatus::Busy | PresenceStatus::InCall
        )
    }
}

#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub status: PresenceStatus,
    pub current_call: Option<CallId>,
}

/// Presence table. Absent users are `offline`; `set_offline` removes the
/// entry so the table stays proportional to live users.
#[derive(Default)]
pub struct PresenceTable {
    entries: HashMap<UserId, PresenceEntry>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str) -> Option<&PresenceEntry> {
        self.entries.get(user_id)
    }

    pub fn status_of(&self, user_id: &str) -> PresenceStatus {
        self.entries
            .get(user_id)
            .map(|e| e.status)
            .unwrap_or(PresenceStatus::Offline)
    }

    pub fn current_call(&self, user_id: &str) -> Option<&CallId> {
        self.entries
            .get(user_id)
            .and_then(|e| e.current_call.as_ref())
    }

    pub fn set_available(&mut self, user_id: &str) {
        self.set(user_id, PresenceStatus::Available, None);
    }

    pub fn set_offline(&mut self, user_id: &str) {
        self.entries.remove(user_id);
    }

    pub fn set_busy(&mut self, user_id: &str, call_id: Option<CallId>) {
        self.set(user_id, PresenceStatus::Busy, call_id);
    }

    pub fn set_ringing(&mut self, user_id: &str, call_id: CallId) {
        self.set(user_id, PresenceStatus::Ringing, Some(call_id));
    }

    pub fn set_in_call(&mut self, user_id: &str, call_id: CallId) {
        self.set(user_id, PresenceStatus::InCall, Some(call_id));
    }

    /// Reset the user to `available` if their current call is `call_id`.
    /// Used by terminal call transitions; users pointing at other calls (or
    /// offline users with no entry) are left untouched.
    pub fn clear_call_if(&mut self, user_id: &str, call_id: &str) {
        let matches_call = self
            .entries
            .get(user_id)
            .and_then(|e| e.current_call.as_deref())
            .map(|c| c == call_id)
            .unwrap_or(false);
        if matches_call {
            self.set_available(user_id);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserId, &PresenceEntry)> {
        self.entries.iter()
    }

    fn set(&mut self, user_id: &str, status: PresenceStatus, current_call: Option<CallId>) {
        self.entries.insert(
            user_id.to_string(),
            PresenceEntry {
                status,
                current_call,
            },
        );
    }
}
