//! Point-in-time view of the monitor, as served to viewers.

use serde::Serialize;

use crate::data::reading::Reading;

/// Label used while the thermometer is linked.
pub const STATUS_ONLINE: &str = "Online";
/// Label used while the link is being re-established.
pub const STATUS_SEARCHING: &str = "Searching...";

/// Consistent snapshot of connectivity, the latest reading and uptime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Whether the thermometer is currently linked.
    pub connected: bool,
    /// Configured device label.
    pub device: String,
    /// Most recent reading, if any arrived yet.
    pub last_reading: Option<Reading>,
    /// Process uptime, `H:MM:SS`.
    pub uptime: String,
    /// Human readable link state.
    pub status: &'static str,
}

impl StatusSnapshot {
    /// Status label for a connectivity flag.
    pub fn status_label(connected: bool) -> &'static str {
        if connected {
            STATUS_ONLINE
        } else {
            STATUS_SEARCHING
        }
    }
}
