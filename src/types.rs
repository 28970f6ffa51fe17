use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Asset ids
// ---------------------------------------------------------------------------

/// Canonical form of an asset id: trimmed and lowercased.
/// Ids end up comma-joined in the upstream query, so only a conservative
/// character set is accepted.
pub fn normalize_asset_id(raw: &str) -> Result<String> {
    let id = raw.trim().to_lowercase();
    if id.is_empty() {
        return Err(AppError::Validation("asset id must not be empty".to_string()));
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(AppError::Validation(format!(
            "asset id {id:?} contains invalid character {bad:?}"
        )));
    }
    Ok(id)
}

// ---------------------------------------------------------------------------
// Price snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSnapshot {
    pub id: String,
    pub price: Decimal,
    /// CoinGecko omits the 24h change for freshly listed assets.
    pub change_24h: Option<Decimal>,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-id failure of a price fetch. One failing id never fails the others.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    /// Upstream does not know the id.
    NotFound,
    /// Upstream returned the id but its fields failed validation.
    Malformed { reason: String },
    /// Transient failures exhausted the retry budget.
    Unavailable { attempts: u32, cause: String },
    /// Non-retryable upstream refusal (auth, bad request).
    Rejected { cause: String },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::NotFound => write!(f, "unknown asset id"),
            FetchError::Malformed { reason } => write!(f, "malformed quote: {reason}"),
            FetchError::Unavailable { attempts, cause } => {
                write!(f, "unavailable after {attempts} attempt(s): {cause}")
            }
            FetchError::Rejected { cause } => write!(f, "rejected: {cause}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sheet rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetRow {
    pub id: String,
    pub price: Decimal,
    /// Blank cell in the sheet.
    pub change_24h: Option<Decimal>,
    pub currency: String,
    pub exported_at: String,
}

impl SheetRow {
    pub fn from_snapshot(snapshot: &PriceSnapshot, exported_at: DateTime<Utc>) -> Self {
        Self {
            id: snapshot.id.clone(),
            price: snapshot.price,
            change_24h: snapshot.change_24h,
            currency: snapshot.currency.clone(),
            exported_at: exported_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// A row that `read_rows` refused, with its 1-based sheet row number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowDiagnostic {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RowsRead {
    pub rows: Vec<SheetRow>,
    pub diagnostics: Vec<RowDiagnostic>,
}

// ---------------------------------------------------------------------------
// Performance analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mover {
    pub id: String,
    pub change_24h: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PerformanceResult {
    Leaders { top_gainer: Mover, top_loser: Mover },
    EmptyDataset,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub sheet_name: String,
    pub result: PerformanceResult,
    pub rows_analyzed: usize,
    pub diagnostics: Vec<RowDiagnostic>,
}

// ---------------------------------------------------------------------------
// Export pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStage {
    Fetching,
    Writing,
    Sharing,
}

impl std::fmt::Display for ExportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExportStage::Fetching => "fetching",
            ExportStage::Writing => "writing",
            ExportStage::Sharing => "sharing",
        };
        write!(f, "{s}")
    }
}

/// Idle → Fetching → Writing → Sharing → Done, or Failed from any working stage.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportState {
    Idle,
    Running(ExportStage),
    Done,
    Failed { stage: ExportStage, reason: String },
}

impl std::fmt::Display for ExportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportState::Idle => write!(f, "idle"),
            ExportState::Running(stage) => write!(f, "{stage}"),
            ExportState::Done => write!(f, "done"),
            ExportState::Failed { stage, reason } => write!(f, "failed({stage}): {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedAsset {
    pub id: String,
    pub error: FetchError,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub sheet_name: String,
    pub spreadsheet_id: String,
    pub url: String,
    pub rows_written: usize,
    pub shared_with: String,
    pub skipped: Vec<SkippedAsset>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize_asset_id("  BitCoin \n").unwrap(), "bitcoin");
        assert_eq!(normalize_asset_id("usd-coin").unwrap(), "usd-coin");
    }

    #[test]
    fn normalize_rejects_empty_and_separators() {
        assert!(matches!(normalize_asset_id("   "), Err(AppError::Validation(_))));
        assert!(matches!(normalize_asset_id("btc,eth"), Err(AppError::Validation(_))));
        assert!(matches!(normalize_asset_id("wrapped bitcoin"), Err(AppError::Validation(_))));
    }
}
