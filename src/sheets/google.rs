use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::error::{classify_http, AppError, Result};
use crate::latency::LatencyStats;
use crate::sheets::auth::{ServiceAccountKey, TokenProvider};
use crate::sheets::SheetsBackend;

const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

/// Sheets v4 + Drive v3 over REST, authenticated as a service account.
pub struct GoogleSheetsBackend {
    http: reqwest::Client,
    tokens: TokenProvider,
    sheets_url: String,
    drive_url: String,
    latency: Arc<LatencyStats>,
}

impl GoogleSheetsBackend {
    pub fn new(cfg: &Config, key: ServiceAccountKey, latency: Arc<LatencyStats>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent("crypto-sheets-tracker")
            .build()?;
        let tokens = TokenProvider::new(http.clone(), key)?;
        Ok(Self {
            http,
            tokens,
            sheets_url: cfg.sheets_api_url.trim_end_matches('/').to_string(),
            drive_url: cfg.drive_api_url.trim_end_matches('/').to_string(),
            latency,
        })
    }

    pub fn service_account(&self) -> &str {
        self.tokens.client_email()
    }

    /// One authenticated request. Non-2xx answers go through the shared
    /// classification; an empty success body comes back as `Value::Null`.
    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        context: &str,
    ) -> Result<Value> {
        let token = self.tokens.access_token().await?;
        let mut req = self.http.request(method, url).bearer_auth(token).query(query);
        if let Some(body) = body {
            req = req.json(body);
        }

        let started = Instant::now();
        let resp = req.send().await;
        self.latency.record(started.elapsed());
        let resp = resp?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(classify_http(status, context, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn first_sheet_id(&self, spreadsheet_id: &str) -> Result<i64> {
        let url = format!("{}/spreadsheets/{spreadsheet_id}", self.sheets_url);
        let meta = self
            .send(
                Method::GET,
                &url,
                &[("fields", "sheets.properties.sheetId")],
                None,
                "Sheets metadata",
            )
            .await?;
        meta.pointer("/sheets/0/properties/sheetId")
            .and_then(Value::as_i64)
            .ok_or_else(|| AppError::Permanent(format!("spreadsheet {spreadsheet_id} has no sheets")))
    }
}

/// Drive query string literal: backslash and quote are escaped.
fn drive_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn find_query(title: &str) -> String {
    format!(
        "mimeType='{SPREADSHEET_MIME}' and name='{}' and trashed=false",
        drive_literal(title)
    )
}

fn format_requests(sheet_id: i64) -> Value {
    let column = |idx: i64| {
        json!({
            "sheetId": sheet_id,
            "startRowIndex": 1,
            "startColumnIndex": idx,
            "endColumnIndex": idx + 1
        })
    };
    let colour_rule = |kind: &str, rgb: (f64, f64, f64)| {
        json!({
            "addConditionalFormatRule": {
                "index": 0,
                "rule": {
                    "ranges": [column(2)],
                    "booleanRule": {
                        "condition": { "type": kind, "values": [{ "userEnteredValue": "0" }] },
                        "format": {
                            "textFormat": {
                                "foregroundColor": { "red": rgb.0, "green": rgb.1, "blue": rgb.2 }
                            }
                        }
                    }
                }
            }
        })
    };

    json!({
        "requests": [
            {
                "repeatCell": {
                    "range": { "sheetId": sheet_id, "startRowIndex": 0, "endRowIndex": 1 },
                    "cell": { "userEnteredFormat": { "textFormat": { "bold": true } } },
                    "fields": "userEnteredFormat.textFormat.bold"
                }
            },
            {
                "repeatCell": {
                    "range": column(1),
                    "cell": { "userEnteredFormat": { "numberFormat": { "type": "CURRENCY", "pattern": "$#,##0.00" } } },
                    "fields": "userEnteredFormat.numberFormat"
                }
            },
            {
                "repeatCell": {
                    "range": column(2),
                    "cell": { "userEnteredFormat": { "numberFormat": { "type": "NUMBER", "pattern": "0.00\"%\"" } } },
                    "fields": "userEnteredFormat.numberFormat"
                }
            },
            colour_rule("NUMBER_GREATER", (0.0, 0.6, 0.0)),
            colour_rule("NUMBER_LESS", (0.8, 0.0, 0.0)),
            {
                "updateSheetProperties": {
                    "properties": { "sheetId": sheet_id, "gridProperties": { "frozenRowCount": 1 } },
                    "fields": "gridProperties.frozenRowCount"
                }
            }
        ]
    })
}

#[async_trait]
impl SheetsBackend for GoogleSheetsBackend {
    async fn find_spreadsheet(&self, title: &str) -> Result<Option<String>> {
        let url = format!("{}/files", self.drive_url);
        let q = find_query(title);
        let found = self
            .send(
                Method::GET,
                &url,
                &[("q", q.as_str()), ("fields", "files(id,name)"), ("pageSize", "10")],
                None,
                "Drive files.list",
            )
            .await?;

        let files = found["files"].as_array().cloned().unwrap_or_default();
        if files.len() > 1 {
            debug!("{} spreadsheets are titled '{title}', using the first", files.len());
        }
        Ok(files
            .first()
            .and_then(|f| f["id"].as_str())
            .map(str::to_string))
    }

    async fn create_spreadsheet(&self, title: &str) -> Result<String> {
        let url = format!("{}/spreadsheets", self.sheets_url);
        let body = json!({ "properties": { "title": title } });
        let created = self
            .send(Method::POST, &url, &[], Some(&body), "Sheets create")
            .await?;
        created["spreadsheetId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AppError::Permanent("Sheets create returned no spreadsheetId".to_string()))
    }

    async fn read_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<Value>>> {
        let url = format!("{}/spreadsheets/{spreadsheet_id}/values/{range}", self.sheets_url);
        let body = self
            .send(
                Method::GET,
                &url,
                &[("valueRenderOption", "UNFORMATTED_VALUE")],
                None,
                "Sheets values.get",
            )
            .await?;
        match body.get("values") {
            Some(values) => Ok(serde_json::from_value(values.clone())?),
            None => Ok(Vec::new()),
        }
    }

    async fn append_values(&self, spreadsheet_id: &str, range: &str, rows: &[Vec<Value>]) -> Result<()> {
        let url = format!(
            "{}/spreadsheets/{spreadsheet_id}/values/{range}:append",
            self.sheets_url
        );
        let body = json!({ "values": rows });
        self.send(
            Method::POST,
            &url,
            &[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")],
            Some(&body),
            "Sheets values.append",
        )
        .await?;
        Ok(())
    }

    async fn format_sheet(&self, spreadsheet_id: &str) -> Result<()> {
        let sheet_id = self.first_sheet_id(spreadsheet_id).await?;
        let url = format!("{}/spreadsheets/{spreadsheet_id}:batchUpdate", self.sheets_url);
        self.send(
            Method::POST,
            &url,
            &[],
            Some(&format_requests(sheet_id)),
            "Sheets batchUpdate",
        )
        .await?;
        Ok(())
    }

    async fn grant_permission(&self, spreadsheet_id: &str, email: &str, role: &str) -> Result<()> {
        let url = format!("{}/files/{spreadsheet_id}/permissions", self.drive_url);
        let body = json!({ "type": "user", "role": role, "emailAddress": email });
        self.send(
            Method::POST,
            &url,
            &[("sendNotificationEmail", "true")],
            Some(&body),
            "Drive permissions.create",
        )
        .await?;
        Ok(())
    }
}
