use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::channel::ClientChannel;
use crate::{CallId, UserId};

/// Call lifecycle. Terminated calls are not represented: terminal transitions
/// remove the record from the registry outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Initiated,
    Active,
}

/// An ICE candidate retained for observability and trimmed by TTL.
#[derive(Debug, Clone)]
pub struct BufferedCandidate {
    pub from: UserId,
    pub candidate: Value,
    pub ts: Instant,
}

pub struct CallRecord {
    pub call_id: CallId,
    pub caller_id: UserId,
    pub receiver_ids: Vec<UserId>,
    pub call_type: String,
    pub extra_meta: Option<Value>,
    /// Ordered set of user ids currently bound to this call.
    pub participants: Vec<UserId>,
    /// Channel handles captured at join time. A weak cache over the user
    /// directory: entries may be missing or stale and must be validated
    /// before use.
    pub participant_channels: HashMap<UserId, ClientChannel>,
    pub status: CallStatus,
    pub offer_attempts: u32,
    pub last_offer_time: Option<Instant>,
    /// Recent candidates per target user.
    pub ice_buffer: HashMap<UserId, Vec<BufferedCandidate>>,
    pub created_at: DateTime<Utc>,
}

impl CallRecord {
    pub fn new(
        call_id: CallId,
        caller_id: UserId,
        receiver_ids: Vec<UserId>,
        call_type: String,
        extra_meta: Option<Value>,
        caller_channel: ClientChannel,
    ) -> Self {
        let mut participants = vec![caller_id.clone()];
        for receiver in &receiver_ids {
            if !participants.contains(receiver) {
                participants.push(receiver.clone());
            }
        }
        let mut participant_channels = HashMap::new();
        participant_channels.insert(caller_id.clone(), caller_channel);
        Self {
            call_id,
            caller_id,
            receiver_ids,
            call_type,
            extra_meta,
            participants,
            participant_channels,
            status: CallStatus::Initiated,
            offer_attempts: 0,
            last_offer_time: None,
            ice_buffer: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    pub fn add_participant(&mut self, user_id: &str) {
        if !self.is_participant(user_id) {
            self.participants.push(user_id.to_string());
        }
    }

    /// Drop the user from the participant list and their channel binding.
    pub fn remove_participant(&mut self, user_id: &str) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p != user_id);
        self.participant_channels.remove(user_id);
        self.participants.len() != before
    }

    pub fn bind_channel(&mut self, user_id: UserId, channel: ClientChannel) {
        self.participant_channels.insert(user_id, channel);
    }

    pub fn buffer_candidate(&mut self, to: &str, from: UserId, candidate: Value, ts: Instant) {
        self.ice_buffer
            .entry(to.to_string())
            .or_default()
            .push(BufferedCandidate {
                from,
                candidate,
                ts,
            });
    }
}

/// Registry of non-terminated calls. Inserting an id that is already present
/// replaces the stale record (the caller is expected to cancel its timer).
#[derive(Default)]
pub struct CallRegistry {
    calls: HashMap<CallId, CallRecord>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: CallRecord) -> Option<CallRecord> {
        self.calls.insert(record.call_id.clone(), record)
    }

    pub fn get(&self, call_id: &str) -> Option<&CallRecord> {
        self.calls.get(call_id)
    }

    pub fn get_mut(&mut self, call_id: &str) -> Option<&mut CallRecord> {
        self.calls.get_mut(call_id)
    }

    pub fn remove(&mut self, call_id: &str) -> Option<CallRecord> {
        self.calls.remove(call_id)
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.calls.contains_key(call_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CallId, &CallRecord)> {
        self.calls.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&CallId, &mut CallRecord)> {
        self.calls.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn channel(conn_id: &str) -> ClientChannel {
        let (tx, _rx) = mpsc::unbounded_channel();
        ClientChannel::new(conn_id.to_string(), tx)
    }

    fn record(call_id: &str) -> CallRecord {
        CallRecord::new(
            call_id.into(),
            "alice".into(),
            vec!["bob".into()],
            "audio".into(),
            None,
            channel("x"),
        )
    }

    #[test]
    fn new_record_orders_caller_before_receivers() {
        let call = record("c1");
        assert_eq!(call.participants, ["alice", "bob"]);
        assert_eq!(call.status, CallStatus::Initiated);
        assert!(call.participant_channels.contains_key("alice"));
        assert!(!call.participant_channels.contains_key("bob"));
    }

    #[test]
    fn remove_participant_drops_the_channel_binding() {
        let mut call = record("c1");
        call.bind_channel("bob".into(), channel("y"));
        assert!(call.remove_participant("bob"));
        assert!(!call.is_participant("bob"));
        assert!(!call.participant_channels.contains_key("bob"));
        assert!(!call.remove_participant("bob"));
    }

    #[test]
    fn insert_replaces_a_stale_record_with_the_same_id() {
        let mut registry = CallRegistry::new();
        assert!(registry.insert(record("c1")).is_none());
        let mut fresh = record("c1");
        fresh.call_type = "video".into();
        let stale = registry.insert(fresh).unwrap();
        assert_eq!(stale.call_type, "audio");
        assert_eq!(registry.get("c1").unwrap().call_type, "video");
        assert_eq!(registry.len(), 1);
    }
}
