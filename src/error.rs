//! Error types for the ft95-monitor crate.

use thiserror::Error;

/// Coarse classification of an [`Error`], used to decide how far it may travel.
///
/// Everything except [`ErrorCategory::FatalConfig`] is contained inside the
/// loop that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Scan, connect or notify failure. Triggers backoff-and-retry.
    Transport,
    /// Malformed notification payload. The single reading is dropped.
    Decode,
    /// External spreadsheet write failure. Superseded by the next tick.
    SyncWrite,
    /// Missing or invalid configuration. Prevents startup.
    FatalConfig,
}

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[cfg(feature = "bluetooth")]
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The connection to the peripheral was lost.
    #[error("Connection lost")]
    ConnectionLost,

    /// A bounded transport operation did not finish in time.
    #[error("{operation} timed out")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// None of the candidate characteristics could be subscribed to.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID (or UUID list) that was not found.
        uuid: String,
    },

    /// Invalid data was received from the peripheral.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// A decoded temperature fell outside the configured plausible range.
    #[error("Temperature {celsius:.1}°C outside accepted range {min:.1}..={max:.1}")]
    OutOfRange {
        /// The decoded value.
        celsius: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// HTTP error talking to the spreadsheet service.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The spreadsheet service rejected a request.
    #[error("Sheet write failed: {reason}")]
    SyncWrite {
        /// Status and body returned by the service.
        reason: String,
    },

    /// Configuration is missing or invalid.
    #[error("Configuration error: {reason}")]
    Config {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// Configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error (config or token files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            #[cfg(feature = "bluetooth")]
            Self::Bluetooth(_) => ErrorCategory::Transport,
            Self::BluetoothUnavailable
            | Self::ConnectionLost
            | Self::Timeout { .. }
            | Self::CharacteristicNotFound { .. } => ErrorCategory::Transport,
            Self::InvalidData { .. } | Self::OutOfRange { .. } => ErrorCategory::Decode,
            Self::Http(_) | Self::SyncWrite { .. } | Self::Json(_) => ErrorCategory::SyncWrite,
            Self::Config { .. } | Self::ConfigParse(_) | Self::Io(_) => {
                ErrorCategory::FatalConfig
            }
        }
    }

    /// Only configuration errors are allowed to stop the process.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::FatalConfig
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
