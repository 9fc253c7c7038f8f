//! Monitor configuration.
//!
//! Loaded from a TOML file where every field has a default, so a missing or
//! partial file is valid. A fixed set of environment variables overrides the
//! file, and [`Config::validate`] rejects combinations the monitor cannot run
//! with.
//!
//! ```toml
//! [device]
//! address = "FF:00:00:00:01:C8"
//! label = "FT95"
//!
//! [ble]
//! characteristics = ["2A1C", "FFF4"]
//! scan_timeout_secs = 5
//!
//! [sync]
//! spreadsheet_id = "1AbC..."
//! credentials_file = "/run/secrets/sheets-key.json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::ble::connection::LinkSettings;
use crate::ble::uuids::parse_characteristic;
use crate::error::{Error, Result};
use crate::protocol::{DecodeStrategy, Decoder};
use crate::store::DEFAULT_HISTORY_LIMIT;
use crate::sync::{GoogleSheetsClient, TokenSource, SHEETS_API_BASE};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "FT95_CONFIG";

/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "ft95.toml";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub ble: BleConfig,
    pub decode: DecodeConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Which thermometer to link with.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// MAC address (or advertised name) of the thermometer.
    pub address: String,
    /// Label stamped onto readings.
    pub label: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: "FF:00:00:00:01:C8".to_string(),
            label: "FT95".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Notification characteristics, tried in order.
    pub characteristics: Vec<String>,
    pub scan_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub backoff_secs: u64,
    pub liveness_interval_ms: u64,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            characteristics: vec!["2A1C".to_string(), "FFF4".to_string()],
            scan_timeout_secs: 5,
            connect_timeout_secs: 10,
            backoff_secs: 2,
            liveness_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub strategy: DecodeStrategy,
    /// Lower bound of accepted readings, °C.
    pub min_celsius: Option<f64>,
    /// Upper bound of accepted readings, °C.
    pub max_celsius: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub history_limit: usize,
    /// Events buffered per live viewer before it starts skipping.
    pub push_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            push_capacity: crate::fanout::DEFAULT_PUSH_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Target spreadsheet. Sync is disabled when unset.
    pub spreadsheet_id: Option<String>,
    pub worksheet: String,
    /// Fixed row that is overwritten on every tick.
    pub row: u32,
    pub period_secs: u64,
    pub access_token: Option<String>,
    /// File holding the access token, re-read on every request.
    pub access_token_file: Option<PathBuf>,
    /// Service-account JSON key used to mint tokens.
    pub credentials_file: Option<PathBuf>,
    pub api_base: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            worksheet: "Temperature_Readings".to_string(),
            row: 2,
            period_secs: 5,
            access_token: None,
            access_token_file: None,
            credentials_file: None,
            api_base: SHEETS_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Parse a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let config = toml::from_str(&content)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Build the effective configuration: file, then environment, then
    /// validation.
    ///
    /// The file is `path` if given, else `$FT95_CONFIG`, else `ft95.toml` in
    /// the working directory if present. Without any file the defaults apply.
    ///
    /// # Errors
    ///
    /// Returns a fatal configuration error on unreadable files, malformed
    /// overrides or failed validation.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .or_else(|| {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                local.exists().then_some(local)
            });

        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides, reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable does not parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = var("THERMOMETER_MAC_ADDRESS") {
            self.device.address = v;
        }
        if let Some(v) = var("DEVICE_NAME") {
            self.device.label = v;
        }
        if let Some(v) = var("SCAN_TIMEOUT") {
            self.ble.scan_timeout_secs = parse_number("SCAN_TIMEOUT", &v)?;
        }
        if let Some(v) = var("CONNECTION_TIMEOUT") {
            self.ble.connect_timeout_secs = parse_number("CONNECTION_TIMEOUT", &v)?;
        }
        if let Some(v) = var("GOOGLE_SHEET_ID") {
            self.sync.spreadsheet_id = Some(v);
        }
        if let Some(v) = var("WORKSHEET_NAME") {
            self.sync.worksheet = v;
        }
        if let Some(v) = var("GOOGLE_ACCESS_TOKEN") {
            self.sync.access_token = Some(v);
        }
        if let Some(v) = var("GOOGLE_ACCESS_TOKEN_FILE") {
            self.sync.access_token_file = Some(PathBuf::from(v));
        }
        if let Some(v) = var("GOOGLE_CREDENTIALS_FILE") {
            self.sync.credentials_file = Some(PathBuf::from(v));
        }
        if let Some(v) = var("SYNC_PERIOD") {
            self.sync.period_secs = parse_number("SYNC_PERIOD", &v)?;
        }
        if let Some(v) = var("HOST") {
            self.server.host = v;
        }
        if let Some(v) = var("PORT") {
            self.server.port = parse_number("PORT", &v)?;
        }
        if let Some(v) = var("MAX_READINGS_DISPLAY") {
            self.store.history_limit = parse_number("MAX_READINGS_DISPLAY", &v)?;
        }

        Ok(())
    }

    /// Reject configurations the monitor cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.device.address.trim().is_empty() {
            return Err(Error::config("device address is empty"));
        }
        if self.ble.characteristics.is_empty() {
            return Err(Error::config("no notification characteristics configured"));
        }
        for id in &self.ble.characteristics {
            parse_characteristic(id)?;
        }
        if self.store.history_limit == 0 {
            return Err(Error::config("history limit must be at least 1"));
        }

        let periods = [
            ("ble.scan_timeout_secs", self.ble.scan_timeout_secs),
            ("ble.connect_timeout_secs", self.ble.connect_timeout_secs),
            ("ble.backoff_secs", self.ble.backoff_secs),
            ("ble.liveness_interval_ms", self.ble.liveness_interval_ms),
            ("sync.period_secs", self.sync.period_secs),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, value)| *value == 0) {
            return Err(Error::config(format!("{name} must be greater than zero")));
        }

        if let (Some(min), Some(max)) = (self.decode.min_celsius, self.decode.max_celsius) {
            if min >= max {
                return Err(Error::config(format!(
                    "decode range is inverted: min {min} >= max {max}"
                )));
            }
        }

        if self.sync.row == 0 {
            return Err(Error::config("sync row must be 1 or greater"));
        }
        if self.sync_enabled() && self.token_source().is_none() {
            return Err(Error::config(
                "spreadsheet id is set but no credentials, access token or token file is configured",
            ));
        }

        Ok(())
    }

    /// Connection-manager settings.
    ///
    /// # Errors
    ///
    /// Returns an error if a characteristic id does not parse.
    pub fn link_settings(&self) -> Result<LinkSettings> {
        let characteristics = self
            .ble
            .characteristics
            .iter()
            .map(|id| parse_characteristic(id))
            .collect::<Result<Vec<_>>>()?;

        Ok(LinkSettings {
            identifier: self.device.address.clone(),
            device_label: self.device.label.clone(),
            characteristics,
            scan_timeout: Duration::from_secs(self.ble.scan_timeout_secs),
            connect_timeout: Duration::from_secs(self.ble.connect_timeout_secs),
            backoff: Duration::from_secs(self.ble.backoff_secs),
            liveness_interval: Duration::from_millis(self.ble.liveness_interval_ms),
        })
    }

    /// Notification decoder. A one-sided range is open on the other side.
    pub fn decoder(&self) -> Decoder {
        let decoder = Decoder::new(self.decode.strategy);
        match (self.decode.min_celsius, self.decode.max_celsius) {
            (None, None) => decoder,
            (min, max) => decoder.with_range(
                min.unwrap_or(f64::NEG_INFINITY),
                max.unwrap_or(f64::INFINITY),
            ),
        }
    }

    /// Whether spreadsheet sync is configured.
    pub fn sync_enabled(&self) -> bool {
        self.sync
            .spreadsheet_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    /// Token source for the Sheets API.
    ///
    /// A service-account key wins over a token file, which wins over a
    /// static token.
    pub fn token_source(&self) -> Option<TokenSource> {
        let sync = &self.sync;
        sync.credentials_file
            .clone()
            .map(TokenSource::ServiceAccount)
            .or_else(|| sync.access_token_file.clone().map(TokenSource::File))
            .or_else(|| sync.access_token.clone().map(TokenSource::Static))
    }

    /// Sheets client, or `None` when sync is not configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the
    /// service-account key is unusable.
    pub fn sheets_client(&self) -> Result<Option<GoogleSheetsClient>> {
        let (Some(id), Some(token)) = (self.sync.spreadsheet_id.as_deref(), self.token_source())
        else {
            return Ok(None);
        };
        if id.trim().is_empty() {
            return Ok(None);
        }

        let client = GoogleSheetsClient::new(id.trim(), &self.sync.worksheet, token, &self.device.label)?
            .with_base_url(&self.sync.api_base);
        Ok(Some(client))
    }

    /// Interval between spreadsheet writes.
    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync.period_secs)
    }

    /// `host:port` the HTTP server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::config(format!("{name} must be a number, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();

        assert_eq!(config.device.address, "FF:00:00:00:01:C8");
        assert_eq!(config.ble.characteristics, vec!["2A1C", "FFF4"]);
        assert_eq!(config.store.history_limit, 50);
        assert_eq!(config.sync.row, 2);
        assert_eq!(config.sync.worksheet, "Temperature_Readings");
        assert_eq!(config.bind_address(), "0.0.0.0:5000");
        assert!(!config.sync_enabled());
    }

    #[test]
    fn test_default_link_settings() {
        let settings = Config::default().link_settings().unwrap();
        assert_eq!(settings, LinkSettings::default());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[device]
address = "AA:BB:CC:DD:EE:FF"

[decode]
strategy = "ieee11073"
min_celsius = -20.0
max_celsius = 120.0

[sync]
spreadsheet_id = "sheet"
access_token = "tok"
period_secs = 10

[logging]
json = true
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.device.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.device.label, "FT95");
        assert_eq!(config.decode.strategy, DecodeStrategy::Ieee11073);
        assert_eq!(config.decoder().strategy(), DecodeStrategy::Ieee11073);
        assert_eq!(config.sync_period(), Duration::from_secs(10));
        assert_eq!(config.token_source(), Some(TokenSource::Static("tok".to_string())));
        assert!(config.sync_enabled());
        assert!(config.logging.json);
        assert!(config.sheets_client().unwrap().is_some());
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[device\naddress = 1").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
        assert!(err.is_fatal());

        let missing = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(missing.is_fatal());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("THERMOMETER_MAC_ADDRESS", "11:22:33:44:55:66"),
                ("DEVICE_NAME", "Kitchen"),
                ("SCAN_TIMEOUT", "8"),
                ("PORT", "8080"),
                ("MAX_READINGS_DISPLAY", "20"),
                ("GOOGLE_SHEET_ID", "abc"),
                ("GOOGLE_ACCESS_TOKEN_FILE", "/run/token"),
                ("HOST", ""),
            ]))
            .unwrap();

        assert_eq!(config.device.address, "11:22:33:44:55:66");
        assert_eq!(config.device.label, "Kitchen");
        assert_eq!(config.ble.scan_timeout_secs, 8);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.store.history_limit, 20);
        assert_eq!(
            config.token_source(),
            Some(TokenSource::File(PathBuf::from("/run/token")))
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_service_account_wins_over_tokens() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("GOOGLE_SHEET_ID", "abc"),
                ("GOOGLE_ACCESS_TOKEN", "tok"),
                ("GOOGLE_ACCESS_TOKEN_FILE", "/run/token"),
                ("GOOGLE_CREDENTIALS_FILE", "/run/key.json"),
            ]))
            .unwrap();

        assert_eq!(
            config.sync.credentials_file.as_deref(),
            Some(Path::new("/run/key.json"))
        );
        assert_eq!(
            config.token_source(),
            Some(TokenSource::ServiceAccount(PathBuf::from("/run/key.json")))
        );
        config.validate().unwrap();

        // The key is loaded when the client is built
        assert!(config.sheets_client().unwrap_err().is_fatal());
    }

    #[test]
    fn test_env_rejects_non_numeric() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("PORT", "http")])).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_validate_rejects_unusable_settings() {
        let cases: Vec<(&str, Box<dyn Fn(&mut Config)>)> = vec![
            ("address", Box::new(|c: &mut Config| c.device.address = " ".to_string())),
            ("characteristics", Box::new(|c: &mut Config| c.ble.characteristics.clear())),
            ("characteristic id", Box::new(|c: &mut Config| c.ble.characteristics = vec!["zz".to_string()])),
            ("history", Box::new(|c: &mut Config| c.store.history_limit = 0)),
            ("scan timeout", Box::new(|c: &mut Config| c.ble.scan_timeout_secs = 0)),
            ("backoff", Box::new(|c: &mut Config| c.ble.backoff_secs = 0)),
            ("sync period", Box::new(|c: &mut Config| c.sync.period_secs = 0)),
            ("row", Box::new(|c: &mut Config| c.sync.row = 0)),
            (
                "range",
                Box::new(|c: &mut Config| {
                    c.decode.min_celsius = Some(50.0);
                    c.decode.max_celsius = Some(10.0);
                }),
            ),
            ("token", Box::new(|c: &mut Config| c.sync.spreadsheet_id = Some("sheet".to_string()))),
        ];

        for (name, mutate) in cases {
            let mut config = Config::default();
            mutate(&mut config);
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, Error::Config { .. }),
                "{name}: unexpected {err:?}"
            );
        }
    }

    #[test]
    fn test_one_sided_range() {
        let mut config = Config::default();
        config.decode.max_celsius = Some(100.0);
        let decoder = config.decoder();
        assert!(decoder.decode_celsius(&[0x00, 0xE8, 0x03]).is_ok());
        assert!(decoder.decode_celsius(&[0x00, 0xF2, 0x03]).is_err());
    }
}
