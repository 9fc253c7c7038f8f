// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ft95-monitor
//!
//! A self-healing Bluetooth Low Energy link to an FT95 thermometer, with
//! live push to browser viewers and a periodically refreshed spreadsheet row.
//!
//! ## Features
//!
//! - **Link supervision**: scan, connect and listen forever, reconnecting
//!   after every drop with a fixed backoff
//! - **Decoding**: vendor fixed-offset layout or the standard Temperature
//!   Measurement characteristic
//! - **State store**: latest reading plus a bounded, newest-first history
//! - **Live push**: WebSocket fan-out that never waits on slow viewers
//! - **Spreadsheet sync**: one fixed row overwritten every few seconds
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ft95_monitor::{Config, Monitor, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::resolve(None)?;
//!     let monitor = Monitor::new(config);
//!
//!     let shutdown = monitor.shutdown_token();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.cancel();
//!     });
//!
//!     monitor.run().await
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### macOS
//! Requires Bluetooth permission for the terminal or bundled app.
//!
//! ## Feature Flags
//!
//! - `bluetooth` (default): the btleplug-backed transport, [`Monitor::run`]
//!   and the binary. Without it the library still builds and can be driven
//!   through any [`ble::BleTransport`].

pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod fanout;
pub mod logging;
pub mod monitor;
pub mod pipeline;
pub mod protocol;
pub mod server;
pub mod store;
pub mod sync;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{Error, ErrorCategory, Result};
pub use monitor::Monitor;
pub use utils::{celsius_to_fahrenheit, fahrenheit_to_celsius};

// Re-export commonly used types from submodules
pub use ble::connection::{ConnectionManager, LinkSettings, LinkState, ReadingHandler};
pub use data::{ConnectionStatus, Reading, StatusSnapshot};
pub use fanout::{Fanout, PushEvent, Viewer};
pub use pipeline::Pipeline;
pub use protocol::{DecodeStrategy, Decoder};
pub use store::StateStore;
pub use sync::{GoogleSheetsClient, SheetWriter, SyncWorker};
