// ABOUTME: Concurrent registry of live sessions keyed by connection id and role
// ABOUTME: Tracks lifecycle state, timestamps and traffic counters; unknown ids read as unbound

use super::handle::SessionHandle;
use crate::datatypes::BindType;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Lifecycle of one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unbound,
    Binding,
    /// Bound with an unspecified role
    Bound,
    BoundTx,
    BoundRx,
    BoundTrx,
    Unbinding,
    Closed,
    Failed,
}

impl SessionState {
    pub fn bound_as(bind_type: BindType) -> Self {
        match bind_type {
            BindType::Transmitter => SessionState::BoundTx,
            BindType::Receiver => SessionState::BoundRx,
            BindType::Transceiver => SessionState::BoundTrx,
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(
            self,
            SessionState::Bound | SessionState::BoundTx | SessionState::BoundRx | SessionState::BoundTrx
        )
    }

    pub fn can_submit(&self) -> bool {
        matches!(
            self,
            SessionState::Bound | SessionState::BoundTx | SessionState::BoundTrx
        )
    }

    pub fn can_receive(&self) -> bool {
        matches!(
            self,
            SessionState::Bound | SessionState::BoundRx | SessionState::BoundTrx
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unbound => "UNBOUND",
            SessionState::Binding => "BINDING",
            SessionState::Bound => "BOUND",
            SessionState::BoundTx => "BOUND_TX",
            SessionState::BoundRx => "BOUND_RX",
            SessionState::BoundTrx => "BOUND_TRX",
            SessionState::Unbinding => "UNBINDING",
            SessionState::Closed => "CLOSED",
            SessionState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Registry key for a session: one live handle per connection and role.
pub fn session_key(connection_id: &str, bind_type: BindType) -> String {
    format!("{connection_id}/{bind_type}")
}

/// Point-in-time copy of one registry entry.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub connection_id: String,
    pub bind_type: Option<BindType>,
    pub state: SessionState,
    pub bind_time: Option<DateTime<Utc>>,
    pub unbind_time: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub errors: u64,
}

#[derive(Debug)]
struct SessionEntry {
    handle: Option<SessionHandle>,
    bind_type: Option<BindType>,
    state: SessionState,
    bind_time: Option<DateTime<Utc>>,
    unbind_time: Option<DateTime<Utc>>,
    last_activity: DateTime<Utc>,
    messages_sent: u64,
    messages_received: u64,
    errors: u64,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            handle: None,
            bind_type: None,
            state: SessionState::Unbound,
            bind_time: None,
            unbind_time: None,
            last_activity: Utc::now(),
            messages_sent: 0,
            messages_received: 0,
            errors: 0,
        }
    }

    fn snapshot(&self, connection_id: &str) -> SessionSnapshot {
        SessionSnapshot {
            connection_id: connection_id.to_string(),
            bind_type: self.bind_type,
            state: self.state,
            bind_time: self.bind_time,
            unbind_time: self.unbind_time,
            last_activity: self.last_activity,
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            errors: self.errors,
        }
    }

    fn set_state(&mut self, state: SessionState) {
        let now = Utc::now();
        if state.is_bound() {
            self.bind_time = Some(now);
            self.unbind_time = None;
        } else if matches!(state, SessionState::Closed | SessionState::Unbound) {
            self.unbind_time = Some(now);
        }
        self.state = state;
        self.last_activity = now;
    }
}

/// Shared by every manager and monitor. Critical sections are short map
/// operations; nothing here awaits.
#[derive(Debug, Default)]
pub struct SessionStateManager {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_entry(&self, id: &str, update: impl FnOnce(&mut SessionEntry)) {
        let mut sessions = self.write();
        update(sessions.entry(id.to_string()).or_insert_with(SessionEntry::new));
    }

    /// Install `handle` as the live session for `id`, retiring any other
    /// handle registered under the same id. Counters carry over.
    pub fn register(&self, id: &str, handle: SessionHandle) {
        let retired = {
            let mut sessions = self.write();
            let entry = sessions.entry(id.to_string()).or_insert_with(SessionEntry::new);
            entry.bind_type = Some(handle.bind_type());
            entry.set_state(SessionState::bound_as(handle.bind_type()));
            entry
                .handle
                .replace(handle.clone())
                .filter(|old| !old.ptr_eq(&handle))
        };

        if let Some(old) = retired {
            info!(session = id, "retiring previous session handle");
            old.close();
        }
        info!(session = id, bind_type = %handle.bind_type(), "session registered");
    }

    /// Forget the live handle. The entry and its counters stay readable.
    pub fn unregister(&self, id: &str) {
        let mut sessions = self.write();
        if let Some(entry) = sessions.get_mut(id) {
            entry.handle = None;
            if !entry.state.is_terminal() {
                entry.set_state(SessionState::Unbound);
            }
            debug!(session = id, "session unregistered");
        }
    }

    /// Clear the handle only if it is still `handle`. Used by a closing
    /// session so it never clobbers its replacement.
    pub(crate) fn mark_closed(&self, id: &str, handle: &SessionHandle) {
        let mut sessions = self.write();
        if let Some(entry) = sessions.get_mut(id) {
            if entry.handle.as_ref().is_some_and(|current| current.ptr_eq(handle)) {
                entry.handle = None;
                entry.set_state(SessionState::Closed);
                info!(session = id, "session closed");
            }
        }
    }

    /// True when a live handle is registered and bound.
    pub fn is_active(&self, id: &str) -> bool {
        self.read().get(id).is_some_and(|entry| {
            entry.state.is_bound() && entry.handle.as_ref().is_some_and(|h| !h.is_closed())
        })
    }

    pub fn update_state(&self, id: &str, state: SessionState) {
        self.with_entry(id, |entry| {
            if entry.state != state {
                debug!(session = id, from = %entry.state, to = %state, "session state change");
            }
            entry.set_state(state);
        });
    }

    pub fn state(&self, id: &str) -> SessionState {
        self.read()
            .get(id)
            .map_or(SessionState::Unbound, |entry| entry.state)
    }

    pub fn increment_sent(&self, id: &str) {
        self.with_entry(id, |entry| {
            entry.messages_sent += 1;
            entry.last_activity = Utc::now();
        });
    }

    pub fn increment_received(&self, id: &str) {
        self.with_entry(id, |entry| {
            entry.messages_received += 1;
            entry.last_activity = Utc::now();
        });
    }

    pub fn increment_errors(&self, id: &str) {
        self.with_entry(id, |entry| {
            entry.errors += 1;
            entry.last_activity = Utc::now();
        });
    }

    /// Record activity without counting a message.
    pub fn touch(&self, id: &str) {
        if let Some(entry) = self.write().get_mut(id) {
            entry.last_activity = Utc::now();
        }
    }

    pub fn info(&self, id: &str) -> Option<SessionSnapshot> {
        self.read().get(id).map(|entry| entry.snapshot(id))
    }

    pub fn handle(&self, id: &str) -> Option<SessionHandle> {
        self.read().get(id).and_then(|entry| entry.handle.clone())
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<_> = self
            .read()
            .iter()
            .map(|(id, entry)| entry.snapshot(id))
            .collect();
        all.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        all
    }

    pub fn active_connection_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .read()
            .iter()
            .filter(|(_, entry)| entry.state.is_bound() && entry.handle.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn active_count(&self) -> usize {
        self.active_connection_ids().len()
    }

    pub fn total_sent(&self) -> u64 {
        self.read().values().map(|entry| entry.messages_sent).sum()
    }

    pub fn total_received(&self) -> u64 {
        self.read().values().map(|entry| entry.messages_received).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.read().values().map(|entry| entry.errors).sum()
    }

    /// Drop every entry, closing any handles still registered.
    pub fn clear(&self) {
        let handles: Vec<SessionHandle> = self
            .write()
            .drain()
            .filter_map(|(_, entry)| entry.handle)
            .collect();
        for handle in handles {
            handle.close();
        }
    }
}
