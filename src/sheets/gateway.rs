use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::SHEET_RANGE;
use crate::error::{AppError, Result};
use crate::retry::RetryPolicy;
use crate::sheets::rows::{decode_rows, encode_row, header_row};
use crate::sheets::SheetsBackend;
use crate::types::{RowsRead, SheetRow};

const HEADER_RANGE: &str = "A1:E1";
const SHARE_ROLE: &str = "writer";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetHandle {
    pub name: String,
    pub id: String,
}

impl SheetHandle {
    pub fn url(&self) -> String {
        spreadsheet_url(&self.id)
    }
}

pub fn spreadsheet_url(spreadsheet_id: &str) -> String {
    format!("https://docs.google.com/spreadsheets/d/{spreadsheet_id}/edit")
}

/// Name-addressed access to export spreadsheets.
///
/// The name → id mapping is looked up on every call and never cached, so a
/// sheet renamed or deleted behind our back is noticed on the next call.
pub struct SpreadsheetGateway {
    backend: Arc<dyn SheetsBackend>,
    retry: RetryPolicy,
}

impl SpreadsheetGateway {
    pub fn new(backend: Arc<dyn SheetsBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Find the spreadsheet titled `sheet_name`, creating it when absent.
    pub async fn ensure_sheet(&self, sheet_name: &str) -> Result<SheetHandle> {
        let name = validate_sheet_name(sheet_name)?;
        let backend = &self.backend;

        // Lookup runs again on every attempt: a create that timed out locally
        // may still have succeeded remotely.
        let id = self
            .retry
            .run("spreadsheet lookup", || async move {
                if let Some(id) = backend.find_spreadsheet(name).await? {
                    return Ok(id);
                }
                let id = backend.create_spreadsheet(name).await?;
                info!("Created spreadsheet '{name}' ({id})");
                Ok::<_, AppError>(id)
            })
            .await?;

        Ok(SheetHandle {
            name: name.to_string(),
            id,
        })
    }

    /// Append `rows` below whatever the sheet already holds. Earlier exports
    /// are never deduplicated against.
    pub async fn write_rows(&self, sheet_name: &str, rows: &[SheetRow]) -> Result<SheetHandle> {
        let handle = self.ensure_sheet(sheet_name).await?;
        let backend = &self.backend;
        let id = handle.id.as_str();

        let header = self
            .retry
            .run("spreadsheet header read", || backend.read_values(id, HEADER_RANGE))
            .await?;
        if header.iter().all(|row| row.is_empty()) {
            let header_values = vec![header_row()];
            self.retry
                .run("spreadsheet header write", || {
                    backend.append_values(id, SHEET_RANGE, &header_values)
                })
                .await?;
            if let Err(e) = backend.format_sheet(id).await {
                warn!("Formatting spreadsheet '{}' failed, data is unaffected: {e}", handle.name);
            }
        }

        if rows.is_empty() {
            return Ok(handle);
        }
        let values: Vec<_> = rows.iter().map(encode_row).collect();
        self.retry
            .run("spreadsheet append", || backend.append_values(id, SHEET_RANGE, &values))
            .await?;
        info!("Appended {} rows to spreadsheet '{}'", rows.len(), handle.name);
        Ok(handle)
    }

    /// Give `grantee_email` writer access. A permission refusal is returned
    /// on the first attempt.
    #[allow(dead_code)]
    pub async fn share(&self, sheet_name: &str, grantee_email: &str) -> Result<SheetHandle> {
        validate_email(grantee_email)?;
        let handle = self.ensure_sheet(sheet_name).await?;
        self.share_handle(&handle, grantee_email).await?;
        Ok(handle)
    }

    /// Grant on an already resolved spreadsheet. No lookup by name, so the
    /// grant lands on exactly the spreadsheet `handle` names.
    pub async fn share_handle(&self, handle: &SheetHandle, grantee_email: &str) -> Result<()> {
        let email = validate_email(grantee_email)?;
        let backend = &self.backend;
        let id = handle.id.as_str();

        self.retry
            .run("spreadsheet share", || backend.grant_permission(id, email, SHARE_ROLE))
            .await?;
        info!("Shared spreadsheet '{}' ({id}) with {email}", handle.name);
        Ok(())
    }

    /// All current data rows. Never creates the spreadsheet.
    pub async fn read_rows(&self, sheet_name: &str) -> Result<RowsRead> {
        let name = validate_sheet_name(sheet_name)?;
        let backend = &self.backend;

        let id = self
            .retry
            .run("spreadsheet lookup", || backend.find_spreadsheet(name))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("spreadsheet '{name}'")))?;
        let values = self
            .retry
            .run("spreadsheet read", || backend.read_values(&id, SHEET_RANGE))
            .await?;

        let read = decode_rows(&values);
        for diag in &read.diagnostics {
            warn!("Skipping row {} of '{name}': {}", diag.row, diag.reason);
        }
        info!(
            "Read {} rows from spreadsheet '{name}' ({} skipped)",
            read.rows.len(),
            read.diagnostics.len()
        );
        Ok(read)
    }
}

pub(crate) fn validate_sheet_name(raw: &str) -> Result<&str> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::Validation("sheet name must not be empty".to_string()));
    }
    Ok(name)
}

pub(crate) fn validate_email(raw: &str) -> Result<&str> {
    let email = raw.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(AppError::Validation(format!("{email:?} is not a valid email address")));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::test_policy;
    use crate::testing::FakeSheetsBackend;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;

    fn gateway(backend: &Arc<FakeSheetsBackend>) -> SpreadsheetGateway {
        SpreadsheetGateway::new(backend.clone(), test_policy(3))
    }

    fn row(id: &str, change: Option<&str>) -> SheetRow {
        SheetRow {
            id: id.to_string(),
            price: Decimal::from_str("10").unwrap(),
            change_24h: change.map(|c| Decimal::from_str(c).unwrap()),
            currency: "usd".to_string(),
            exported_at: "2024-05-01 10:00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn ensure_sheet_finds_before_creating() {
        let backend = Arc::new(FakeSheetsBackend::default());
        let gw = gateway(&backend);

        let first = gw.ensure_sheet("Crypto").await.unwrap();
        let second = gw.ensure_sheet(" Crypto ").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.created_count(), 1);
    }

    #[tokio::test]
    async fn ensure_sheet_is_not_cached_across_calls() {
        let backend = Arc::new(FakeSheetsBackend::default());
        let gw = gateway(&backend);

        let first = gw.ensure_sheet("Crypto").await.unwrap();
        backend.delete_spreadsheet("Crypto");
        let second = gw.ensure_sheet("Crypto").await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn create_that_timed_out_is_found_on_retry() {
        let backend = Arc::new(FakeSheetsBackend::default());
        backend.create_then_fail_once();
        let gw = gateway(&backend);

        gw.ensure_sheet("Crypto").await.unwrap();
        assert_eq!(backend.created_count(), 1);
    }

    #[tokio::test]
    async fn write_rows_adds_header_once_and_appends_without_dedupe() {
        let backend = Arc::new(FakeSheetsBackend::default());
        let gw = gateway(&backend);

        gw.write_rows("Crypto", &[row("bitcoin", Some("1.5"))]).await.unwrap();
        gw.write_rows("Crypto", &[row("bitcoin", Some("1.5"))]).await.unwrap();

        let values = backend.values_of("Crypto");
        assert_eq!(values.len(), 3, "header + two identical exports: {values:?}");
        assert_eq!(values[0][0], json!("id"));
        assert_eq!(values[1], values[2]);
        assert_eq!(backend.format_calls(), 1);
    }

    #[tokio::test]
    async fn formatting_failure_does_not_fail_write() {
        let backend = Arc::new(FakeSheetsBackend::default());
        backend.fail_formatting();
        let gw = gateway(&backend);

        gw.write_rows("Crypto", &[row("bitcoin", None)]).await.unwrap();
        assert_eq!(backend.values_of("Crypto").len(), 2);
    }

    #[tokio::test]
    async fn transient_append_failure_is_retried() {
        let backend = Arc::new(FakeSheetsBackend::default());
        backend.fail_next_append(AppError::Transient("HTTP 503".into()));
        let gw = gateway(&backend);

        gw.write_rows("Crypto", &[row("bitcoin", None)]).await.unwrap();
        assert_eq!(backend.values_of("Crypto").len(), 2);
        assert_eq!(backend.append_calls(), 3);
    }

    #[tokio::test]
    async fn share_permission_error_is_immediate() {
        let backend = Arc::new(FakeSheetsBackend::default());
        backend.deny_sharing();
        let gw = gateway(&backend);

        let err = gw.share("Crypto", "user@example.com").await.unwrap_err();
        assert!(matches!(err, AppError::Permission(_)), "{err:?}");
        assert_eq!(backend.share_attempts(), 1);
    }

    #[tokio::test]
    async fn share_records_writer_grant() {
        let backend = Arc::new(FakeSheetsBackend::default());
        let gw = gateway(&backend);

        gw.share("Crypto", "user@example.com").await.unwrap();
        assert_eq!(backend.grants(), vec![("user@example.com".to_string(), "writer".to_string())]);
    }

    #[tokio::test]
    async fn transient_share_failure_is_retried() {
        let backend = Arc::new(FakeSheetsBackend::default());
        backend.fail_next_share(AppError::Transient("HTTP 503".into()));
        let gw = gateway(&backend);

        gw.share("Crypto", "user@example.com").await.unwrap();
        assert_eq!(backend.share_attempts(), 2);
        assert_eq!(backend.grants().len(), 1);
    }

    #[tokio::test]
    async fn share_handle_grants_on_written_sheet_despite_lagging_search() {
        let backend = Arc::new(FakeSheetsBackend::default());
        backend.lag_search_after_create();
        let gw = gateway(&backend);

        let handle = gw.write_rows("Crypto", &[row("bitcoin", None)]).await.unwrap();
        gw.share_handle(&handle, "user@example.com").await.unwrap();

        assert_eq!(backend.granted_on(), vec![handle.id.clone()]);
        assert_eq!(backend.created_count(), 1);
    }

    #[tokio::test]
    async fn share_rejects_malformed_email_before_calling_backend() {
        let backend = Arc::new(FakeSheetsBackend::default());
        let gw = gateway(&backend);

        for bad in ["", "user", "user@", "@example.com", "a b@example.com", "user@example"] {
            assert!(matches!(gw.share("Crypto", bad).await, Err(AppError::Validation(_))), "{bad}");
        }
        assert_eq!(backend.created_count(), 0);
    }

    #[tokio::test]
    async fn read_rows_of_missing_sheet_is_not_found_and_creates_nothing() {
        let backend = Arc::new(FakeSheetsBackend::default());
        let gw = gateway(&backend);

        let err = gw.read_rows("Nope").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(backend.created_count(), 0);
    }

    #[tokio::test]
    async fn read_rows_round_trips_written_rows_and_reports_bad_ones() {
        let backend = Arc::new(FakeSheetsBackend::default());
        let gw = gateway(&backend);
        gw.write_rows("Crypto", &[row("bitcoin", Some("4")), row("ethereum", None)])
            .await
            .unwrap();
        backend.push_raw_row("Crypto", vec![json!("solana"), json!(150), json!("n/a")]);

        let read = gw.read_rows("Crypto").await.unwrap();
        let ids: Vec<_> = read.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["bitcoin", "ethereum"]);
        assert_eq!(read.rows[0].change_24h, Some(Decimal::from_str("4").unwrap()));
        assert_eq!(read.diagnostics.len(), 1);
        assert_eq!(read.diagnostics[0].row, 4);
    }

    #[tokio::test]
    async fn empty_sheet_name_is_rejected() {
        let backend = Arc::new(FakeSheetsBackend::default());
        let gw = gateway(&backend);
        assert!(matches!(gw.ensure_sheet("  ").await, Err(AppError::Validation(_))));
        assert!(matches!(gw.read_rows("").await, Err(AppError::Validation(_))));
    }

    #[test]
    fn url_points_at_editor() {
        assert_eq!(
            spreadsheet_url("abc123"),
            "https://docs.google.com/spreadsheets/d/abc123/edit"
        );
    }
}
