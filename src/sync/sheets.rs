//! Spreadsheet writer.
//!
//! [`SheetWriter`] is the narrow interface the sync worker drives;
//! [`GoogleSheetsClient`] implements it against the Google Sheets v4 REST
//! API with an OAuth bearer token, either supplied directly or minted from a
//! service-account key.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, Method, Response, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::data::{SheetRow, READING_SOURCE};
use crate::error::{Error, Result};

/// Default Sheets API endpoint.
pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

/// Column headers written when the worksheet is created.
pub const HEADER_ROW: [&str; 8] = [
    "DATE",
    "TIME",
    "TEMP (°C)",
    "TEMP (°F)",
    "DEVICE",
    "STATUS",
    "TIMESTAMP",
    "SOURCE",
];

/// OAuth scope requested for service-account tokens.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes the fixed spreadsheet slot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SheetWriter: Send + Sync {
    /// Make sure the worksheet exists and has its header row.
    async fn prepare(&self) -> Result<()>;

    /// Overwrite row `slot` with `fields`.
    async fn write_row(&self, slot: u32, fields: &SheetRow) -> Result<()>;

    /// Read row `slot` back, `None` if empty.
    async fn read_row(&self, slot: u32) -> Result<Option<SheetRow>>;
}

/// Where the OAuth access token comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Fixed token.
    Static(String),
    /// File re-read before every request, so an external refresher can
    /// rotate it.
    File(PathBuf),
    /// Service-account JSON key. Tokens are minted from it and cached until
    /// shortly before they expire.
    ServiceAccount(PathBuf),
}

/// Loaded form of a [`TokenSource`].
#[derive(Clone)]
enum Credentials {
    Static(String),
    File(PathBuf),
    ServiceAccount(Arc<CustomServiceAccount>),
}

impl Credentials {
    fn load(source: TokenSource) -> Result<Self> {
        Ok(match source {
            TokenSource::Static(token) => Self::Static(token),
            TokenSource::File(path) => Self::File(path),
            TokenSource::ServiceAccount(path) => {
                let account = CustomServiceAccount::from_file(&path).map_err(|e| {
                    Error::config(format!(
                        "invalid service account key {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::ServiceAccount(Arc::new(account))
            }
        })
    }

    async fn token(&self) -> Result<String> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::File(path) => tokio::fs::read_to_string(path)
                .await
                .map(|t| t.trim().to_string())
                .map_err(|e| Error::SyncWrite {
                    reason: format!("cannot read access token {}: {}", path.display(), e),
                }),
            Self::ServiceAccount(account) => account
                .token(&[SHEETS_SCOPE])
                .await
                .map(|t| t.as_str().to_string())
                .map_err(|e| Error::SyncWrite {
                    reason: format!("cannot mint access token: {e}"),
                }),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Static(..)"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::ServiceAccount(_) => f.write_str("ServiceAccount(..)"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

/// Google Sheets v4 client bound to one worksheet.
#[derive(Debug, Clone)]
pub struct GoogleSheetsClient {
    http: Client,
    base_url: String,
    spreadsheet_id: String,
    worksheet: String,
    credentials: Credentials,
    device_label: String,
}

impl GoogleSheetsClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built, or a fatal
    /// configuration error if a service-account key cannot be loaded.
    pub fn new(
        spreadsheet_id: impl Into<String>,
        worksheet: impl Into<String>,
        token: TokenSource,
        device_label: impl Into<String>,
    ) -> Result<Self> {
        let credentials = Credentials::load(token)?;
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            base_url: SHEETS_API_BASE.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            worksheet: worksheet.into(),
            credentials,
            device_label: device_label.into(),
        })
    }

    /// Point the client at another endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// A1 range qualified with the worksheet title.
    fn range(&self, cells: &str) -> String {
        format!("'{}'!{}", self.worksheet.replace('\'', "''"), cells)
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let invalid = || Error::SyncWrite {
            reason: format!("invalid Sheets API base URL '{}'", self.base_url),
        };

        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: Option<serde_json::Value>) -> Result<Response> {
        let token = self.credentials.token().await?;
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(Error::SyncWrite {
                reason: format!("{}: {}", status, body.trim()),
            })
        }
    }

    async fn put_values(&self, cells: &str, rows: Vec<Vec<String>>) -> Result<()> {
        let range = self.range(cells);
        let mut url = self.url(&["v4", "spreadsheets", &self.spreadsheet_id, "values", &range])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": rows,
        });

        self.send(Method::PUT, url, Some(body)).await?;
        Ok(())
    }

    async fn worksheet_exists(&self) -> Result<bool> {
        let mut url = self.url(&["v4", "spreadsheets", &self.spreadsheet_id])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");

        let meta: SpreadsheetMeta = self.send(Method::GET, url, None).await?.json().await?;
        Ok(meta
            .sheets
            .iter()
            .any(|s| s.properties.title == self.worksheet))
    }

    async fn add_worksheet(&self) -> Result<()> {
        let batch = format!("{}:batchUpdate", self.spreadsheet_id);
        let url = self.url(&["v4", "spreadsheets", &batch])?;

        let body = json!({
            "requests": [{
                "addSheet": {
                    "properties": {
                        "title": self.worksheet,
                        "gridProperties": { "rowCount": 100, "columnCount": 10 },
                    }
                }
            }]
        });

        self.send(Method::POST, url, Some(body)).await?;
        Ok(())
    }

    fn placeholder_row(&self) -> Vec<String> {
        vec![
            "Waiting...".to_string(),
            "--:--:--".to_string(),
            "--.--".to_string(),
            "--.--".to_string(),
            self.device_label.clone(),
            "Connecting...".to_string(),
            Local::now().to_rfc3339(),
            READING_SOURCE.to_string(),
        ]
    }
}

#[async_trait]
impl SheetWriter for GoogleSheetsClient {
    async fn prepare(&self) -> Result<()> {
        if self.worksheet_exists().await? {
            debug!("Using existing worksheet '{}'", self.worksheet);
            return Ok(());
        }

        info!("Creating worksheet '{}'", self.worksheet);
        self.add_worksheet().await?;

        let header = HEADER_ROW.iter().map(|h| h.to_string()).collect();
        self.put_values("A1:H2", vec![header, self.placeholder_row()])
            .await
    }

    async fn write_row(&self, slot: u32, fields: &SheetRow) -> Result<()> {
        self.put_values(&format!("A{slot}:H{slot}"), vec![fields.to_vec()])
            .await
    }

    async fn read_row(&self, slot: u32) -> Result<Option<SheetRow>> {
        let range = self.range(&format!("A{slot}:H{slot}"));
        let url = self.url(&["v4", "spreadsheets", &self.spreadsheet_id, "values", &range])?;

        let values: ValueRange = self.send(Method::GET, url, None).await?.json().await?;
        Ok(values.values.into_iter().next().and_then(|mut row| {
            row.resize(8, String::new());
            SheetRow::try_from(row).ok()
        }))
    }
}
