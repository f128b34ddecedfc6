//! Channels: admission and concurrency limiting for connections
//!
//! A connection reports every lifecycle boundary to its channel (`enqueue` when
//! queued, `connection_started`/`connection_stopped` around running periods,
//! `dequeue` once terminal). What the channel does with those reports is its own
//! policy; the connection never looks inside.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::connection::Connection;
use crate::types::ConnectionId;

/// Admission policy notified at every connection state boundary
pub trait Channel: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// A connection asks to be admitted
    fn enqueue(&self, connection: &Connection);

    /// A connection leaves the channel for good
    fn dequeue(&self, connection: &Connection);

    /// A connection began (or resumed) using the network
    fn connection_started(&self, connection: &Connection);

    /// A connection stopped using the network (suspended, canceled, or finished)
    fn connection_stopped(&self, connection: &Connection);
}

#[derive(Default)]
struct ChannelState {
    pending: VecDeque<Connection>,
    active: HashMap<ConnectionId, Connection>,
}

/// FIFO channel running at most `max_simultaneous` connections at once
///
/// The channel owns the connections it holds: a queued or running connection
/// stays alive even if the caller dropped every handle to it.
pub struct LimitedChannel {
    name: String,
    max_simultaneous: usize,
    state: Mutex<ChannelState>,
}

impl LimitedChannel {
    /// Create a channel
    ///
    /// A limit of zero is treated as one.
    pub fn new(name: impl Into<String>, max_simultaneous: usize) -> Self {
        Self {
            name: name.into(),
            max_simultaneous: max_simultaneous.max(1),
            state: Mutex::new(ChannelState::default()),
        }
    }

    /// Configured concurrency limit
    pub fn max_simultaneous(&self) -> usize {
        self.max_simultaneous
    }

    /// Connections waiting for a slot
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Connections currently holding a slot
    pub fn running_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Every connection the channel holds, running ones first
    pub fn connections(&self) -> Vec<Connection> {
        let state = self.lock();
        state
            .active
            .values()
            .chain(state.pending.iter())
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start pending connections while slots are free
    ///
    /// `start()` is always called with the lock released, since it reports back
    /// through `connection_started`.
    fn pump(&self) {
        loop {
            let next = {
                let mut state = self.lock();
                if state.active.len() >= self.max_simultaneous {
                    return;
                }
                let Some(next) = state.pending.pop_front() else {
                    return;
                };
                if !next.state().can_start() {
                    continue;
                }
                state.active.insert(next.id(), next.clone());
                next
            };

            tracing::debug!(
                channel = %self.name,
                connection_id = %next.id(),
                "Admitting connection"
            );
            next.start();

            // start() refused (e.g. canceled in between): give the slot back
            if next.state().can_start() || next.state().is_terminal() {
                self.lock().active.remove(&next.id());
            }
        }
    }
}

impl Channel for LimitedChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn enqueue(&self, connection: &Connection) {
        {
            let mut state = self.lock();
            let id = connection.id();
            if connection.state().is_terminal()
                || state.active.contains_key(&id)
                || state.pending.iter().any(|c| c.id() == id)
            {
                return;
            }
            state.pending.push_back(connection.clone());
            tracing::debug!(
                channel = %self.name,
                connection_id = %id,
                pending = state.pending.len(),
                "Connection enqueued"
            );
        }
        self.pump();
    }

    fn dequeue(&self, connection: &Connection) {
        {
            let mut state = self.lock();
            let id = connection.id();
            state.pending.retain(|c| c.id() != id);
            state.active.remove(&id);
        }
        self.pump();
    }

    fn connection_started(&self, connection: &Connection) {
        let mut state = self.lock();
        // Checked under the channel lock: a connection that finished before its
        // start report arrived must not take a slot
        if connection.state().is_terminal() {
            return;
        }
        let id = connection.id();
        state.pending.retain(|c| c.id() != id);
        state.active.insert(id, connection.clone());
    }

    fn connection_stopped(&self, connection: &Connection) {
        let removed = self.lock().active.remove(&connection.id()).is_some();
        if removed {
            self.pump();
        }
    }
}

impl std::fmt::Debug for LimitedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("LimitedChannel")
            .field("name", &self.name)
            .field("max_simultaneous", &self.max_simultaneous)
            .field("pending", &state.pending.len())
            .field("active", &state.active.len())
            .finish()
    }
}
