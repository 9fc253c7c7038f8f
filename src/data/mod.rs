//! Data structures for thermometer data.
//!
//! This module contains the reading produced for every temperature event
//! and the status snapshot served to viewers.

pub mod reading;
pub mod status;

pub use reading::{ConnectionStatus, Reading, SheetRow, READING_SOURCE};
pub use status::StatusSnapshot;
