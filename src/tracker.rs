//! Service facade behind the dispatcher. Owns the export pipeline.

use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::analyzer::analyze;
use crate::error::{AppError, Result};
use crate::quotes::aggregator::FetchOutcome;
use crate::quotes::PriceAggregator;
use crate::sheets::gateway::{validate_email, validate_sheet_name};
use crate::sheets::SpreadsheetGateway;
use crate::types::{
    ExportReport, ExportStage, ExportState, FetchError, PerformanceReport, PriceSnapshot,
    SheetRow, SkippedAsset,
};
use crate::watchlist::WatchlistStore;

pub struct Tracker {
    watchlist: Arc<WatchlistStore>,
    prices: PriceAggregator,
    /// `None` when no service-account credentials were found at startup.
    sheets: Option<SpreadsheetGateway>,
}

impl Tracker {
    pub fn new(
        watchlist: Arc<WatchlistStore>,
        prices: PriceAggregator,
        sheets: Option<SpreadsheetGateway>,
    ) -> Arc<Self> {
        Arc::new(Self {
            watchlist,
            prices,
            sheets,
        })
    }

    pub fn sheets_enabled(&self) -> bool {
        self.sheets.is_some()
    }

    pub fn get_watchlist(&self) -> Vec<String> {
        self.watchlist.list()
    }

    /// `Ok(false)` when the id was already tracked.
    pub fn add_to_watchlist(&self, raw_id: &str) -> Result<bool> {
        self.watchlist.add(raw_id)
    }

    /// `Ok(false)` when the id was not tracked.
    pub fn remove_from_watchlist(&self, raw_id: &str) -> Result<bool> {
        self.watchlist.remove(raw_id)
    }

    /// Latest quote for every tracked id, in watchlist order.
    pub async fn fetch_prices(&self) -> IndexMap<String, FetchOutcome> {
        let ids = self.watchlist.list();
        if ids.is_empty() {
            return IndexMap::new();
        }
        self.prices.fetch(&ids).await
    }

    /// Fetch → write → share. A failing stage stops the run; rows already
    /// appended stay in the sheet.
    pub async fn export_to_sheets(&self, sheet_name: &str, user_email: &str) -> Result<ExportReport> {
        let gateway = self.gateway()?;
        let sheet_name = validate_sheet_name(sheet_name)?;
        let user_email = validate_email(user_email)?;

        let mut run = ExportRun::new(sheet_name);

        run.advance(ExportState::Running(ExportStage::Fetching));
        let ids = self.watchlist.list();
        if ids.is_empty() {
            return Err(run.fail(AppError::Validation("watchlist is empty".to_string())));
        }
        let (snapshots, skipped) = split_outcomes(self.prices.fetch(&ids).await);
        for s in &skipped {
            warn!("Export to '{sheet_name}' skips {}: {}", s.id, s.error);
        }
        if snapshots.is_empty() {
            return Err(run.fail(no_snapshot_error(&skipped)));
        }

        run.advance(ExportState::Running(ExportStage::Writing));
        let exported_at = Utc::now();
        let rows: Vec<SheetRow> = snapshots
            .iter()
            .map(|s| SheetRow::from_snapshot(s, exported_at))
            .collect();
        let handle = match gateway.write_rows(sheet_name, &rows).await {
            Ok(handle) => handle,
            Err(e) => return Err(run.fail(e)),
        };

        run.advance(ExportState::Running(ExportStage::Sharing));
        if let Err(e) = gateway.share_handle(&handle, user_email).await {
            return Err(run.fail(e));
        }

        run.advance(ExportState::Done);
        Ok(ExportReport {
            sheet_name: handle.name.clone(),
            url: handle.url(),
            spreadsheet_id: handle.id,
            rows_written: rows.len(),
            shared_with: user_email.to_string(),
            skipped,
        })
    }

    /// Largest gain and loss among the rows currently in `sheet_name`.
    pub async fn performance_leaders(&self, sheet_name: &str) -> Result<PerformanceReport> {
        let gateway = self.gateway()?;
        let read = gateway.read_rows(sheet_name).await?;
        let result = analyze(&read.rows);
        Ok(PerformanceReport {
            sheet_name: sheet_name.trim().to_string(),
            result,
            rows_analyzed: read.rows.len(),
            diagnostics: read.diagnostics,
        })
    }

    fn gateway(&self) -> Result<&SpreadsheetGateway> {
        self.sheets.as_ref().ok_or_else(|| {
            AppError::Config(
                "spreadsheet integration is not configured; provide GOOGLE_CREDENTIALS_PATH"
                    .to_string(),
            )
        })
    }
}

fn split_outcomes(outcomes: IndexMap<String, FetchOutcome>) -> (Vec<PriceSnapshot>, Vec<SkippedAsset>) {
    let mut snapshots = Vec::with_capacity(outcomes.len());
    let mut skipped = Vec::new();
    for (id, outcome) in outcomes {
        match outcome {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(error) => skipped.push(SkippedAsset { id, error }),
        }
    }
    (snapshots, skipped)
}

/// Error for a fetch that produced nothing. When every id ran out of
/// retries the quote service counts as unavailable, not as refusing.
fn no_snapshot_error(skipped: &[SkippedAsset]) -> AppError {
    let all_unavailable = !skipped.is_empty()
        && skipped
            .iter()
            .all(|s| matches!(s.error, FetchError::Unavailable { .. }));
    if all_unavailable {
        let (attempts, cause) = skipped
            .iter()
            .find_map(|s| match &s.error {
                FetchError::Unavailable { attempts, cause } => Some((*attempts, cause.clone())),
                _ => None,
            })
            .unwrap_or_default();
        return AppError::Unavailable {
            target: "quote service".to_string(),
            attempts,
            cause,
        };
    }
    let cause = skipped
        .first()
        .map(|s| format!("{}: {}", s.id, s.error))
        .unwrap_or_default();
    AppError::Permanent(format!(
        "no price snapshot obtained for {} ids ({cause})",
        skipped.len()
    ))
}

// ---------------------------------------------------------------------------
// Export state machine
// ---------------------------------------------------------------------------

/// One export run. Every transition is logged.
struct ExportRun<'a> {
    sheet_name: &'a str,
    state: ExportState,
}

impl<'a> ExportRun<'a> {
    fn new(sheet_name: &'a str) -> Self {
        Self {
            sheet_name,
            state: ExportState::Idle,
        }
    }

    fn advance(&mut self, next: ExportState) {
        if !is_legal(&self.state, &next) {
            warn!("Export '{}': unexpected transition {} -> {next}", self.sheet_name, self.state);
        }
        info!("Export '{}': {} -> {next}", self.sheet_name, self.state);
        self.state = next;
    }

    /// Moves to `Failed` for the current stage and wraps `err` with it.
    fn fail(&mut self, err: AppError) -> AppError {
        let stage = match self.state {
            ExportState::Running(stage) => stage,
            _ => ExportStage::Fetching,
        };
        self.advance(ExportState::Failed {
            stage,
            reason: err.to_string(),
        });
        AppError::export(stage, err)
    }
}

fn is_legal(from: &ExportState, to: &ExportState) -> bool {
    use ExportStage::*;
    use ExportState::*;
    matches!(
        (from, to),
        (Idle, Running(Fetching))
            | (Running(Fetching), Running(Writing))
            | (Running(Writing), Running(Sharing))
            | (Running(Sharing), Done)
            | (Running(_), Failed { .. })
    )
}
