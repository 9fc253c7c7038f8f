//! Temperature reading captured from the thermometer.

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};

use crate::utils::celsius_to_fahrenheit;

/// Value of the `source` column for readings that came off the device.
pub const READING_SOURCE: &str = "REAL";

/// Link status of the thermometer at a given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    /// Subscribed and receiving notifications.
    Connected,
    /// Link dropped, not yet scanning again.
    Disconnected,
    /// Looking for the peripheral.
    #[default]
    Searching,
}

impl ConnectionStatus {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Label shown to viewers and written to the sheet.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::Searching => "Searching...",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ConnectionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The eight fields of the spreadsheet slot, in column order:
/// date, time, °C, °F, device, status, timestamp, source.
pub type SheetRow = [String; 8];

/// One temperature event received from the thermometer.
///
/// A reading is built in one step from a decoded Celsius value; the
/// Fahrenheit value is derived at construction and the struct exposes no
/// mutators, so the pair can never drift apart.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    temperature_celsius: f64,
    temperature_fahrenheit: f64,
    captured_at: DateTime<Local>,
    device_label: String,
    connection_status: ConnectionStatus,
}

impl Reading {
    /// Create a reading with an explicit capture time.
    pub fn new(
        temperature_celsius: f64,
        device_label: impl Into<String>,
        connection_status: ConnectionStatus,
        captured_at: DateTime<Local>,
    ) -> Self {
        Self {
            temperature_celsius,
            temperature_fahrenheit: celsius_to_fahrenheit(temperature_celsius),
            captured_at,
            device_label: device_label.into(),
            connection_status,
        }
    }

    /// Create a reading stamped with the current local time, as received
    /// on a live link.
    pub fn capture(temperature_celsius: f64, device_label: impl Into<String>) -> Self {
        Self::new(
            temperature_celsius,
            device_label,
            ConnectionStatus::Connected,
            Local::now(),
        )
    }

    /// Temperature in degrees Celsius.
    pub fn temperature_celsius(&self) -> f64 {
        self.temperature_celsius
    }

    /// Temperature in degrees Fahrenheit.
    pub fn temperature_fahrenheit(&self) -> f64 {
        self.temperature_fahrenheit
    }

    /// When the notification was received (host clock).
    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    /// Configured device label.
    pub fn device_label(&self) -> &str {
        &self.device_label
    }

    /// Link status at capture time.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    /// `YYYY-MM-DD` of the capture time.
    pub fn date_display(&self) -> String {
        self.captured_at.format("%Y-%m-%d").to_string()
    }

    /// `HH:MM:SS` of the capture time.
    pub fn time_display(&self) -> String {
        self.captured_at.format("%H:%M:%S").to_string()
    }

    /// Project this reading onto the spreadsheet slot columns.
    ///
    /// The projection depends only on the reading, so rewriting an
    /// unchanged reading yields an identical row.
    pub fn to_sheet_row(&self) -> SheetRow {
        [
            self.date_display(),
            self.time_display(),
            format!("{:.1}", self.temperature_celsius),
            format!("{:.1}", self.temperature_fahrenheit),
            self.device_label.clone(),
            self.connection_status.to_string(),
            self.captured_at.to_rfc3339(),
            READING_SOURCE.to_string(),
        ]
    }
}

#[derive(Serialize)]
struct ReadingWire<'a> {
    temperature_c: f64,
    temperature_f: f64,
    timestamp: String,
    date_display: String,
    time_display: String,
    device: &'a str,
    status: ConnectionStatus,
    source: &'static str,
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ReadingWire {
            temperature_c: self.temperature_celsius,
            temperature_f: self.temperature_fahrenheit,
            timestamp: self.captured_at.to_rfc3339(),
            date_display: self.date_display(),
            time_display: self.time_display(),
            device: &self.device_label,
            status: self.connection_status,
            source: READING_SOURCE,
        }
        .serialize(serializer)
    }
}
