//! Periodic sync worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::fanout::Fanout;
use crate::store::StateStore;
use crate::sync::SheetWriter;

/// Result of one sync tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No reading yet, nothing written.
    Idle,
    /// No writer configured; only the re-broadcast happened.
    Unconfigured,
    /// Row written.
    Written,
    /// Write failed; retried on the next tick.
    Failed,
}

/// Mirrors the current reading into a fixed spreadsheet row and
/// re-broadcasts state to viewers.
///
/// Every tick writes the whole row unconditionally, so a failed tick is
/// repaired by the next successful one.
pub struct SyncWorker {
    store: Arc<StateStore>,
    fanout: Fanout,
    writer: Option<Arc<dyn SheetWriter>>,
    period: Duration,
    slot: u32,
}

impl SyncWorker {
    /// Create a worker writing row `slot` every `period`.
    pub fn new(
        store: Arc<StateStore>,
        fanout: Fanout,
        writer: Option<Arc<dyn SheetWriter>>,
        period: Duration,
        slot: u32,
    ) -> Self {
        Self {
            store,
            fanout,
            writer,
            period,
            slot,
        }
    }

    /// Tick until `cancel` fires.
    ///
    /// The first tick happens one period after start. A tick that overruns
    /// delays the next one instead of bursting.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Some(writer) = &self.writer {
            tokio::select! {
                _ = cancel.cancelled() => return,
                prepared = writer.prepare() => {
                    if let Err(e) = prepared {
                        warn!("Worksheet preparation failed: {}", e);
                    }
                }
            }
        } else {
            info!("No spreadsheet configured, sync only re-broadcasts");
        }

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.tick() => trace!("Sync tick: {:?}", outcome),
            }
        }

        debug!("Sync worker stopped");
    }

    /// Run a single tick.
    pub async fn tick(&self) -> TickOutcome {
        let current = self.store.current();

        let outcome = match (&current, &self.writer) {
            (None, _) => TickOutcome::Idle,
            (Some(_), None) => TickOutcome::Unconfigured,
            (Some(reading), Some(writer)) => {
                match writer.write_row(self.slot, &reading.to_sheet_row()).await {
                    Ok(()) => {
                        info!(
                            "Sheet row {} updated: {:.1}°C",
                            self.slot,
                            reading.temperature_celsius()
                        );
                        TickOutcome::Written
                    }
                    Err(e) => {
                        warn!("Sheet write failed: {}", e);
                        TickOutcome::Failed
                    }
                }
            }
        };

        self.fanout.publish_status(self.store.snapshot_status());

        outcome
    }
}
