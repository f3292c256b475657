pub mod calls;
pub mod directory;
pub mod pending;
pub mod presence;

pub use calls::{BufferedCandidate, CallRecord, CallRegistry, CallStatus};
pub use directory::UserDirectory;
pub use pending::PendingSignals;
pub use presence::{PresenceEntry, PresenceStatus, PresenceTable};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::{CallId, ConnId, UserId};

/// Map of armed no-answer timers. Arming an id that already has a timer
/// cancels the old one atomically with the insertion.
#[derive(Default)]
pub struct TimerTable {
    handles: HashMap<CallId, JoinHandle<()>>,
}

impl TimerTable {
    pub fn arm(&mut self, call_id: CallId, handle: JoinHandle<()>) {
        if let Some(old) = self.handles.insert(call_id, handle) {
            old.abort();
        }
    }

    pub fn cancel(&mut self, call_id: &str) {
        if let Some(handle) = self.handles.remove(call_id) {
            handle.abort();
        }
    }

    /// Drop the handle without aborting. Used by a firing timer to retire
    /// its own entry.
    pub fn forget(&mut self, call_id: &str) {
        self.handles.remove(call_id);
    }

    pub fn is_armed(&self, call_id: &str) -> bool {
        self.handles.contains_key(call_id)
    }
}

/// All mutable server state, guarded by one lock.
///
/// Handlers, timer callbacks and the sweeper are single-writer over these
/// tables: each locks the whole state for its step and never holds a
/// reference into the tables across an await point.
pub struct ServerState {
    pub directory: UserDirectory,
    pub presence: PresenceTable,
    pub pending: PendingSignals,
    pub calls: CallRegistry,
    pub timers: TimerTable,
    /// Reverse map for disconnect cleanup: which user registered on a
    /// connection. Superseded connections are dropped from here when a
    /// re-registration replaces them.
    pub conn_users: HashMap<ConnId, UserId>,
    pub config: Config,
    pub started_at: DateTime<Utc>,
}

pub type SharedState = Arc<Mutex<ServerState>>;

impl ServerState {
    pub fn new(config: Config) -> Self {
        Self {
            directory: UserDirectory::new(),
            presence: PresenceTable::new(),
            pending: PendingSignals::new(),
            calls: CallRegistry::new(),
            timers: TimerTable::default(),
            conn_users: HashMap::new(),
            config,
            started_at: Utc::now(),
        }
    }

    pub fn shared(config: Config) -> SharedState {
        Arc::new(Mutex::new(Self::new(config)))
    }
}
