pub mod auth;
pub mod gateway;
pub mod google;
pub mod rows;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use gateway::SpreadsheetGateway;
pub use google::GoogleSheetsBackend;

/// Remote spreadsheet operations. Each method is one attempt; the gateway
/// owns retries and validation.
#[async_trait]
pub trait SheetsBackend: Send + Sync {
    /// Id of a non-trashed spreadsheet with exactly this title, if any.
    async fn find_spreadsheet(&self, title: &str) -> Result<Option<String>>;

    async fn create_spreadsheet(&self, title: &str) -> Result<String>;

    /// Raw cell values of `range`, row-major. Empty when the range is blank.
    async fn read_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<Value>>>;

    async fn append_values(&self, spreadsheet_id: &str, range: &str, rows: &[Vec<Value>]) -> Result<()>;

    /// Cosmetic formatting of the header and value columns.
    async fn format_sheet(&self, spreadsheet_id: &str) -> Result<()>;

    async fn grant_permission(&self, spreadsheet_id: &str, email: &str, role: &str) -> Result<()>;
}
