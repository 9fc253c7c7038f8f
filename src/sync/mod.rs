//! External sync: periodic mirroring of the current reading into a
//! spreadsheet row.

pub mod sheets;
pub mod worker;

pub use sheets::{GoogleSheetsClient, SheetWriter, TokenSource, HEADER_ROW, SHEETS_API_BASE};
#[cfg(test)]
pub use sheets::MockSheetWriter;
pub use worker::{SyncWorker, TickOutcome};
