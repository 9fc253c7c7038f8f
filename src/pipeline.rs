//! Reading pipeline: the connection manager's [`ReadingHandler`].
//!
//! Every reading is recorded in the [`StateStore`] first and only then
//! pushed, so a viewer that reacts to a push by querying the store sees
//! that reading or a newer one.

use std::sync::Arc;

use tracing::{info, trace};

use crate::ble::connection::ReadingHandler;
use crate::data::Reading;
use crate::fanout::Fanout;
use crate::store::StateStore;

/// Records readings and fans them out.
#[derive(Debug, Clone)]
pub struct Pipeline {
    store: Arc<StateStore>,
    fanout: Fanout,
}

impl Pipeline {
    /// Create a pipeline over a store and a fan-out.
    pub fn new(store: Arc<StateStore>, fanout: Fanout) -> Self {
        Self { store, fanout }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// The underlying fan-out.
    pub fn fanout(&self) -> &Fanout {
        &self.fanout
    }
}

impl ReadingHandler for Pipeline {
    fn on_reading(&self, reading: Reading) {
        info!(
            "New reading: {:.1}°C ({:.1}°F)",
            reading.temperature_celsius(),
            reading.temperature_fahrenheit()
        );

        self.store.record(reading.clone());
        let reached = self
            .fanout
            .publish_reading(reading, self.store.snapshot_status());
        trace!("Reading pushed to {} viewers", reached);
    }

    fn on_link_change(&self, connected: bool) {
        let was_connected = self.store.set_connected(connected);
        if was_connected != connected {
            info!(
                "Thermometer {}",
                if connected { "connected" } else { "disconnected" }
            );
            self.fanout.publish_status(self.store.snapshot_status());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::PushEvent;

    #[tokio::test]
    async fn test_reading_recorded_before_push() {
        let store = Arc::new(StateStore::new("FT95", 5));
        let fanout = Fanout::default();
        let mut viewer = fanout.subscribe();
        let pipeline = Pipeline::new(store.clone(), fanout);

        let reading = Reading::capture(37.4, "FT95");
        pipeline.on_reading(reading.clone());

        assert_eq!(store.current(), Some(reading.clone()));
        assert_eq!(viewer.next().await, Some(PushEvent::NewReading(reading.clone())));
        match viewer.next().await {
            Some(PushEvent::SystemStatus(status)) => {
                assert_eq!(status.last_reading, Some(reading));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_link_change_pushes_only_on_transition() {
        let store = Arc::new(StateStore::new("FT95", 5));
        let fanout = Fanout::default();
        let mut viewer = fanout.subscribe();
        let pipeline = Pipeline::new(store.clone(), fanout.clone());

        pipeline.on_link_change(false);
        pipeline.on_link_change(true);
        pipeline.on_link_change(true);
        pipeline.on_link_change(false);
        drop(pipeline);
        drop(fanout);

        let mut flags = Vec::new();
        while let Some(event) = viewer.next().await {
            if let PushEvent::SystemStatus(status) = event {
                flags.push(status.connected);
            }
        }
        assert_eq!(flags, vec![true, false]);
        assert!(!store.is_connected());
    }
}
