//! System state store.
//!
//! Single source of truth for the latest reading, the bounded history and
//! connectivity. All multi-field access goes through one `RwLock`, so
//! readers never observe a half-applied `record`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::trace;

use crate::data::{Reading, StatusSnapshot};
use crate::utils::format_uptime;

/// Default bound of the reading history.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// State guarded by the store lock.
///
/// There is no separate `current` field: the current reading is
/// `history.front()`, which keeps the two from ever disagreeing.
#[derive(Debug, Default)]
struct SystemState {
    /// Newest first.
    history: VecDeque<Reading>,
    connected: bool,
}

/// Shared, lock-protected state of the monitor.
#[derive(Debug)]
pub struct StateStore {
    inner: RwLock<SystemState>,
    device_label: String,
    history_limit: usize,
    started_at: Instant,
}

impl StateStore {
    /// Create an empty store.
    ///
    /// A `history_limit` of zero is raised to one so the latest reading is
    /// always retained.
    pub fn new(device_label: impl Into<String>, history_limit: usize) -> Self {
        let history_limit = history_limit.max(1);

        Self {
            inner: RwLock::new(SystemState {
                history: VecDeque::with_capacity(history_limit),
                connected: false,
            }),
            device_label: device_label.into(),
            history_limit,
            started_at: Instant::now(),
        }
    }

    /// Make `reading` the current reading, evicting the oldest entries
    /// beyond the history bound.
    pub fn record(&self, reading: Reading) {
        let mut state = self.inner.write();
        state.history.push_front(reading);
        state.history.truncate(self.history_limit);
        trace!("History holds {} readings", state.history.len());
    }

    /// Update the connectivity flag, returning the previous value.
    pub fn set_connected(&self, connected: bool) -> bool {
        std::mem::replace(&mut self.inner.write().connected, connected)
    }

    /// Whether the thermometer is currently linked.
    pub fn is_connected(&self) -> bool {
        self.inner.read().connected
    }

    /// The most recent reading.
    pub fn current(&self) -> Option<Reading> {
        self.inner.read().history.front().cloned()
    }

    /// Up to `count` readings, newest first.
    pub fn recent(&self, count: usize) -> Vec<Reading> {
        self.inner
            .read()
            .history
            .iter()
            .take(count)
            .cloned()
            .collect()
    }

    /// Consistent view of connectivity, the current reading and uptime.
    pub fn snapshot_status(&self) -> StatusSnapshot {
        let (connected, last_reading) = {
            let state = self.inner.read();
            (state.connected, state.history.front().cloned())
        };

        StatusSnapshot {
            connected,
            device: self.device_label.clone(),
            last_reading,
            uptime: format_uptime(self.uptime()),
            status: StatusSnapshot::status_label(connected),
        }
    }

    /// Time since the store was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Number of readings currently held.
    pub fn history_len(&self) -> usize {
        self.inner.read().history.len()
    }

    /// Maximum number of readings held.
    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Configured device label.
    pub fn device_label(&self) -> &str {
        &self.device_label
    }
}
