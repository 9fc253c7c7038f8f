//! Top-level wiring.
//!
//! [`Monitor`] owns the shared store and fan-out and runs the connection
//! manager, the sync worker and the HTTP server side by side. All of them
//! watch one [`CancellationToken`]; cancelling it winds every task down and
//! [`Monitor::run_with`] returns once all of them have finished.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ble::{BleTransport, ConnectionManager};
use crate::config::Config;
use crate::error::Result;
use crate::fanout::Fanout;
use crate::pipeline::Pipeline;
use crate::server::{self, AppState};
use crate::store::StateStore;
use crate::sync::{SheetWriter, SyncWorker};

/// The running monitor.
pub struct Monitor {
    config: Config,
    store: Arc<StateStore>,
    fanout: Fanout,
    cancel: CancellationToken,
}

impl Monitor {
    /// Create a monitor with empty state.
    pub fn new(config: Config) -> Self {
        let store = Arc::new(StateStore::new(
            config.device.label.clone(),
            config.store.history_limit,
        ));
        let fanout = Fanout::new(config.store.push_capacity);

        Self {
            config,
            store,
            fanout,
            cancel: CancellationToken::new(),
        }
    }

    /// Configuration the monitor was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared state store.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Push channel to live viewers.
    pub fn fanout(&self) -> &Fanout {
        &self.fanout
    }

    /// Token that stops every task when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run all tasks with the given collaborators until shutdown.
    ///
    /// Without a `listener` no HTTP server is started; without a `writer`
    /// the sync worker only re-broadcasts status. Returns once every task,
    /// including open viewer sessions, has finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the link settings are invalid.
    pub async fn run_with<T: BleTransport>(
        &self,
        transport: Arc<T>,
        writer: Option<Arc<dyn SheetWriter>>,
        listener: Option<TcpListener>,
    ) -> Result<()> {
        let settings = self.config.link_settings()?;
        let pipeline = Arc::new(Pipeline::new(self.store.clone(), self.fanout.clone()));
        let manager = Arc::new(ConnectionManager::new(
            transport,
            settings,
            self.config.decoder(),
            pipeline,
        ));
        let worker = Arc::new(SyncWorker::new(
            self.store.clone(),
            self.fanout.clone(),
            writer,
            self.config.sync_period(),
            self.config.sync.row,
        ));

        info!(
            device = %self.config.device.address,
            "Monitor starting"
        );

        let link = {
            let manager = manager.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move { manager.run(cancel).await })
        };

        let sync = {
            let worker = worker.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        let http = listener.map(|listener| {
            let state = AppState::new(self.store.clone(), self.fanout.clone(), self.cancel.clone());
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = server::serve(listener, state).await {
                    error!("HTTP server failed: {}", e);
                    cancel.cancel();
                }
            })
        });

        for (name, task) in [("link", link), ("sync", sync)] {
            if let Err(e) = task.await {
                warn!("{} task ended abnormally: {}", name, e);
            }
        }
        if let Some(http) = http {
            if let Err(e) = http.await {
                warn!("http task ended abnormally: {}", e);
            }
        }

        info!("Monitor stopped");
        Ok(())
    }

    /// Run against the system Bluetooth adapter, the configured spreadsheet
    /// and the configured HTTP address.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP address cannot be bound or the
    /// spreadsheet client cannot be built.
    #[cfg(feature = "bluetooth")]
    pub async fn run(&self) -> Result<()> {
        use crate::ble::BtleplugTransport;

        let listener = TcpListener::bind(self.config.bind_address()).await?;
        let writer = self
            .config
            .sheets_client()?
            .map(|client| Arc::new(client) as Arc<dyn SheetWriter>);

        self.run_with(Arc::new(BtleplugTransport::new()), writer, Some(listener))
            .await
    }
}
