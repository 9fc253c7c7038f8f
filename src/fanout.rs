//! Distribution fan-out to live viewers.
//!
//! Events go out over a `tokio::sync::broadcast` channel. Sending never
//! waits on receivers: a viewer that falls more than the channel capacity
//! behind skips the oldest events and carries on from the newest retained
//! one, so a stalled viewer cannot hold up ingestion.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::data::{Reading, StatusSnapshot};
use crate::error::Result;

/// Default number of events buffered per viewer.
pub const DEFAULT_PUSH_CAPACITY: usize = 64;

/// Event pushed to viewers.
///
/// Serialized as `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    /// A reading was just decoded.
    NewReading(Reading),
    /// Broadcast status, sent after every reading, link change and sync tick.
    SystemStatus(StatusSnapshot),
    /// History sent to a viewer when it connects.
    RecentReadings(Vec<Reading>),
    /// Reply to a viewer's `request_status`.
    StatusUpdate(StatusSnapshot),
    /// Reply to a viewer's `request_readings`.
    ReadingsUpdate(Vec<Reading>),
}

impl PushEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewReading(_) => "new_reading",
            Self::SystemStatus(_) => "system_status",
            Self::RecentReadings(_) => "recent_readings",
            Self::StatusUpdate(_) => "status_update",
            Self::ReadingsUpdate(_) => "readings_update",
        }
    }

    /// Encode for a text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Publisher side of the push channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Fanout {
    tx: broadcast::Sender<PushEvent>,
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_CAPACITY)
    }
}

impl Fanout {
    /// Create a fan-out buffering `capacity` events per viewer.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Push an event to every current viewer.
    ///
    /// Returns the number of viewers the event was queued for.
    pub fn publish(&self, event: PushEvent) -> usize {
        let name = event.name();
        let reached = self.tx.send(event).unwrap_or(0);
        trace!("Pushed {} to {} viewers", name, reached);
        reached
    }

    /// Push a fresh reading followed by the status it produced.
    pub fn publish_reading(&self, reading: Reading, status: StatusSnapshot) -> usize {
        let reached = self.publish(PushEvent::NewReading(reading));
        self.publish(PushEvent::SystemStatus(status));
        reached
    }

    /// Push a status snapshot.
    pub fn publish_status(&self, status: StatusSnapshot) -> usize {
        self.publish(PushEvent::SystemStatus(status))
    }

    /// Register a new viewer. It receives events published from now on.
    pub fn subscribe(&self) -> Viewer {
        Viewer {
            rx: self.tx.subscribe(),
            skipped: 0,
        }
    }

    /// Number of registered viewers.
    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving side held by one viewer connection.
#[derive(Debug)]
pub struct Viewer {
    rx: broadcast::Receiver<PushEvent>,
    skipped: u64,
}

impl Viewer {
    /// Wait for the next event.
    ///
    /// Returns `None` once every [`Fanout`] handle is gone.
    pub async fn next(&mut self) -> Option<PushEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Viewer lagged, skipped {} events", missed);
                    self.skipped += missed;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Total events this viewer missed by lagging.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
