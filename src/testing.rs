//! In-process stand-ins for the quote service and the spreadsheet backend.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::quotes::{QuoteBatch, QuoteSource};
use crate::sheets::SheetsBackend;
use crate::types::PriceSnapshot;

// ---------------------------------------------------------------------------
// Quote source
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeQuoteSource {
    prices: HashMap<String, (Decimal, Option<Decimal>)>,
    malformed: Mutex<HashMap<String, String>>,
    scripted_failures: Mutex<VecDeque<AppError>>,
    rejected_ids: Mutex<Vec<String>>,
    batches: Mutex<Vec<Vec<String>>>,
    calls: AtomicU32,
}

impl FakeQuoteSource {
    pub fn with_prices(entries: &[(&str, &str, Option<&str>)]) -> Self {
        let prices = entries
            .iter()
            .map(|(id, price, change)| {
                let price = Decimal::from_str(price).unwrap();
                let change = change.map(|c| Decimal::from_str(c).unwrap());
                (id.to_string(), (price, change))
            })
            .collect();
        Self {
            prices,
            ..Self::default()
        }
    }

    /// The next call fails with `err`, whatever ids it carries.
    pub fn fail_next(&self, err: AppError) {
        self.scripted_failures.lock().unwrap().push_back(err);
    }

    /// Every batch containing `id` is refused permanently.
    pub fn reject_batches_containing(&self, id: &str) {
        self.rejected_ids.lock().unwrap().push(id.to_string());
    }

    pub fn malformed(&self, id: &str, reason: &str) {
        self.malformed
            .lock()
            .unwrap()
            .insert(id.to_string(), reason.to_string());
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl QuoteSource for FakeQuoteSource {
    async fn quote_batch(&self, ids: &[String], currency: &str) -> Result<QuoteBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().unwrap().push(ids.to_vec());

        if let Some(err) = self.scripted_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some(id) = self
            .rejected_ids
            .lock()
            .unwrap()
            .iter()
            .find(|rejected| ids.contains(*rejected))
        {
            return Err(AppError::Permanent(format!("HTTP 400 for batch containing {id}")));
        }

        let malformed = self.malformed.lock().unwrap();
        let mut batch = QuoteBatch::new();
        for id in ids {
            if let Some(reason) = malformed.get(id) {
                batch.insert(id.clone(), Err(reason.clone()));
            } else if let Some((price, change)) = self.prices.get(id) {
                let snapshot = PriceSnapshot {
                    id: id.clone(),
                    price: *price,
                    change_24h: *change,
                    currency: currency.to_string(),
                    timestamp: Utc::now(),
                };
                batch.insert(id.clone(), Ok(snapshot));
            }
        }
        Ok(batch)
    }
}

// ---------------------------------------------------------------------------
// Sheets backend
// ---------------------------------------------------------------------------

struct FakeSpreadsheet {
    id: String,
    title: String,
    values: Vec<Vec<Value>>,
    trashed: bool,
}

#[derive(Default)]
pub struct FakeSheetsBackend {
    sheets: Mutex<Vec<FakeSpreadsheet>>,
    grants: Mutex<Vec<(String, String)>>,
    granted_on: Mutex<Vec<String>>,
    /// Ids Drive search does not return yet.
    unindexed: Mutex<Vec<String>>,
    append_failures: Mutex<VecDeque<AppError>>,
    share_failures: Mutex<VecDeque<AppError>>,
    next_id: AtomicU32,
    created: AtomicU32,
    appends: AtomicU32,
    share_attempts: AtomicU32,
    formats: AtomicU32,
    deny_sharing: AtomicBool,
    fail_formatting: AtomicBool,
    fail_after_create: AtomicBool,
    lag_search: AtomicBool,
}

impl FakeSheetsBackend {
    pub fn created_count(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn append_calls(&self) -> u32 {
        self.appends.load(Ordering::SeqCst)
    }

    pub fn share_attempts(&self) -> u32 {
        self.share_attempts.load(Ordering::SeqCst)
    }

    pub fn format_calls(&self) -> u32 {
        self.formats.load(Ordering::SeqCst)
    }

    pub fn grants(&self) -> Vec<(String, String)> {
        self.grants.lock().unwrap().clone()
    }

    /// Spreadsheet ids that received a grant, in order.
    pub fn granted_on(&self) -> Vec<String> {
        self.granted_on.lock().unwrap().clone()
    }

    /// Spreadsheets created from now on are missed by the next title search.
    pub fn lag_search_after_create(&self) {
        self.lag_search.store(true, Ordering::SeqCst);
    }

    /// All values of the live spreadsheet titled `title`, header included.
    pub fn values_of(&self, title: &str) -> Vec<Vec<Value>> {
        self.sheets
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.title == title && !s.trashed)
            .map(|s| s.values.clone())
            .unwrap_or_default()
    }

    pub fn push_raw_row(&self, title: &str, row: Vec<Value>) {
        let mut sheets = self.sheets.lock().unwrap();
        if let Some(sheet) = sheets.iter_mut().find(|s| s.title == title && !s.trashed) {
            sheet.values.push(row);
        }
    }

    pub fn delete_spreadsheet(&self, title: &str) {
        for sheet in self.sheets.lock().unwrap().iter_mut() {
            if sheet.title == title {
                sheet.trashed = true;
            }
        }
    }

    /// The next create succeeds remotely but reports a timeout.
    pub fn create_then_fail_once(&self) {
        self.fail_after_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_append(&self, err: AppError) {
        self.append_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_next_share(&self, err: AppError) {
        self.share_failures.lock().unwrap().push_back(err);
    }

    pub fn deny_sharing(&self) {
        self.deny_sharing.store(true, Ordering::SeqCst);
    }

    pub fn fail_formatting(&self) {
        self.fail_formatting.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SheetsBackend for FakeSheetsBackend {
    async fn find_spreadsheet(&self, title: &str) -> Result<Option<String>> {
        let hidden = std::mem::take(&mut *self.unindexed.lock().unwrap());
        Ok(self
            .sheets
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.title == title && !s.trashed && !hidden.contains(&s.id))
            .map(|s| s.id.clone()))
    }

    async fn create_spreadsheet(&self, title: &str) -> Result<String> {
        let id = format!("sheet-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sheets.lock().unwrap().push(FakeSpreadsheet {
            id: id.clone(),
            title: title.to_string(),
            values: Vec::new(),
            trashed: false,
        });
        self.created.fetch_add(1, Ordering::SeqCst);
        if self.lag_search.load(Ordering::SeqCst) {
            self.unindexed.lock().unwrap().push(id.clone());
        }
        if self.fail_after_create.swap(false, Ordering::SeqCst) {
            return Err(AppError::Transient("create timed out".to_string()));
        }
        Ok(id)
    }

    async fn read_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<Value>>> {
        let sheets = self.sheets.lock().unwrap();
        let sheet = sheets
            .iter()
            .find(|s| s.id == spreadsheet_id)
            .ok_or_else(|| AppError::NotFound(spreadsheet_id.to_string()))?;
        if range == "A1:E1" {
            return Ok(sheet.values.iter().take(1).cloned().collect());
        }
        Ok(sheet.values.clone())
    }

    async fn append_values(&self, spreadsheet_id: &str, _range: &str, rows: &[Vec<Value>]) -> Result<()> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.append_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut sheets = self.sheets.lock().unwrap();
        let sheet = sheets
            .iter_mut()
            .find(|s| s.id == spreadsheet_id)
            .ok_or_else(|| AppError::NotFound(spreadsheet_id.to_string()))?;
        sheet.values.extend(rows.iter().cloned());
        Ok(())
    }

    async fn format_sheet(&self, _spreadsheet_id: &str) -> Result<()> {
        self.formats.fetch_add(1, Ordering::SeqCst);
        if self.fail_formatting.load(Ordering::SeqCst) {
            return Err(AppError::Permanent("HTTP 400 invalid batchUpdate".to_string()));
        }
        Ok(())
    }

    async fn grant_permission(&self, spreadsheet_id: &str, email: &str, role: &str) -> Result<()> {
        self.share_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.share_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if self.deny_sharing.load(Ordering::SeqCst) {
            return Err(AppError::Permission(
                "HTTP 403 insufficientFilePermissions".to_string(),
            ));
        }
        self.grants
            .lock()
            .unwrap()
            .push((email.to_string(), role.to_string()));
        self.granted_on.lock().unwrap().push(spreadsheet_id.to_string());
        Ok(())
    }
}
