// ABOUTME: Collects received message parts per (source, destination, reference) until a message is complete
// ABOUTME: Per-key locking guarantees exactly-once completion; stale partial messages are evicted best-effort
// ABOUTME: Completed keys stay behind as tombstones so late re-deliveries are recognised as duplicates

use super::types::ConcatInfo;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReassemblyKey {
    pub source: String,
    pub destination: String,
    pub reference: u16,
}

impl ReassemblyKey {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, reference: u16) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            reference,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReassemblyOutcome {
    /// Stored; more parts are needed
    Incomplete { received: usize, total: u8 },
    /// This part number was already seen (or the message already completed)
    Duplicate { received: usize, total: u8 },
    /// The last missing part arrived; the key now only answers `Duplicate`
    Complete { text: String, total: u8 },
}

/// A partial message dropped by [`Reassembler::evict_expired`].
#[derive(Clone, Debug, PartialEq)]
pub struct ExpiredMessage {
    pub key: ReassemblyKey,
    pub text: String,
    pub received: usize,
    pub total: u8,
}

#[derive(Debug)]
struct PendingMessage {
    total: u8,
    parts: BTreeMap<u8, String>,
    finished: bool,
    completed: Option<Instant>,
}

impl PendingMessage {
    fn assemble(&self) -> String {
        self.parts.values().map(String::as_str).collect()
    }

    fn assemble_best_effort(&self) -> String {
        let mut text = String::from("[INCOMPLETE] ");
        for number in 1..=self.total {
            match self.parts.get(&number) {
                Some(part) => text.push_str(part),
                None => text.push_str(&format!("[missing part {number}]")),
            }
        }
        text
    }
}

#[derive(Debug)]
struct Slot {
    created: Instant,
    state: Mutex<PendingMessage>,
}

impl Slot {
    fn new(total: u8) -> Self {
        Self {
            created: Instant::now(),
            state: Mutex::new(PendingMessage {
                total,
                parts: BTreeMap::new(),
                finished: false,
                completed: None,
            }),
        }
    }
}

/// Reassembly state shared by every session of a simulator.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: Mutex<HashMap<ReassemblyKey, Arc<Slot>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one part. The map lock is only held to find the slot; the
    /// read-modify-write happens under that slot's own lock.
    ///
    /// A tombstone whose total disagrees with the incoming part belongs to an
    /// earlier message that reused the reference, so it is replaced.
    pub fn add_part(&self, key: ReassemblyKey, info: ConcatInfo, text: String) -> ReassemblyOutcome {
        let slot = {
            let mut pending = lock(&self.pending);
            let reused = pending.get(&key).is_some_and(|slot| {
                let state = lock(&slot.state);
                state.completed.is_some() && state.total != info.total
            });
            if reused {
                pending.remove(&key);
            }
            pending
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Slot::new(info.total)))
                .clone()
        };

        let mut state = lock(&slot.state);
        if info.total != state.total {
            debug!(
                reference = key.reference,
                expected = state.total,
                got = info.total,
                "part disagrees on total, keeping first value"
            );
        }

        if state.finished {
            return ReassemblyOutcome::Duplicate {
                received: state.total as usize,
                total: state.total,
            };
        }
        if state.parts.contains_key(&info.part) || info.part > state.total {
            return ReassemblyOutcome::Duplicate {
                received: state.parts.len(),
                total: state.total,
            };
        }

        state.parts.insert(info.part, text);
        if state.parts.len() < state.total as usize {
            return ReassemblyOutcome::Incomplete {
                received: state.parts.len(),
                total: state.total,
            };
        }

        let text = state.assemble();
        state.parts.clear();
        state.finished = true;
        state.completed = Some(Instant::now());
        debug!(reference = key.reference, source = %key.source, "message reassembled");
        ReassemblyOutcome::Complete {
            text,
            total: state.total,
        }
    }

    /// Drop partial messages older than `max_age`, returning what they had.
    /// Tombstones of completed messages older than `max_age` are dropped
    /// without being reported.
    pub fn evict_expired(&self, max_age: Duration) -> Vec<ExpiredMessage> {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut pending = lock(&self.pending);
        pending.retain(|key, slot| {
            let mut state = lock(&slot.state);
            if let Some(completed) = state.completed {
                return now.duration_since(completed) < max_age;
            }
            if now.duration_since(slot.created) < max_age {
                return true;
            }

            state.finished = true;
            warn!(
                source = %key.source,
                destination = %key.destination,
                reference = key.reference,
                received = state.parts.len(),
                total = state.total,
                "evicting incomplete message"
            );
            expired.push(ExpiredMessage {
                key: key.clone(),
                text: state.assemble_best_effort(),
                received: state.parts.len(),
                total: state.total,
            });
            false
        });
        expired
    }

    /// Partial messages still waiting for parts. Tombstones are not counted.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending)
            .values()
            .filter(|slot| !lock(&slot.state).finished)
            .count()
    }

    pub fn clear(&self) {
        lock(&self.pending).clear();
    }

    /// Periodically evict stale state until `shutdown` flips to true.
    pub async fn run_cleanup<F>(
        self: Arc<Self>,
        max_age: Duration,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        on_expired: F,
    ) where
        F: Fn(ExpiredMessage) + Send + 'static,
    {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for expired in self.evict_expired(max_age) {
                        on_expired(expired);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("reassembly cleanup stopped");
    }
}
