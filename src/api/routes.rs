use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::prompts;
use crate::error::AppError;
use crate::latency::LatencyStats;
use crate::quotes::aggregator::FetchOutcome;
use crate::tracker::Tracker;
use crate::types::{
    normalize_asset_id, ExportReport, FetchError, PerformanceReport, PerformanceResult,
    PriceSnapshot,
};

#[derive(Clone)]
pub struct ApiState {
    pub tracker: Arc<Tracker>,
    pub quote_latency: Arc<LatencyStats>,
    pub sheets_latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/tools/get_watchlist", post(get_watchlist))
        .route("/tools/add_to_watchlist", post(add_to_watchlist))
        .route("/tools/remove_from_watchlist", post(remove_from_watchlist))
        .route("/tools/fetch_prices", post(fetch_prices))
        .route("/tools/export_to_sheets", post(export_to_sheets))
        .route(
            "/tools/get_sheet_performance_leaders",
            post(get_sheet_performance_leaders),
        )
        .route("/prompts/add_coin", get(add_coin_prompt))
        .route("/prompts/remove_coin", get(remove_coin_prompt))
        .route("/prompts/get_prices", get(get_prices_prompt))
        .route("/prompts/export", get(export_prompt))
        .route("/health", get(health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request bodies and query params
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CoinRequest {
    pub id: String,
}

#[derive(Deserialize)]
pub struct ExportRequest {
    pub sheet_name: String,
    pub user_email: String,
}

#[derive(Deserialize)]
pub struct SheetRequest {
    pub sheet_name: String,
}

#[derive(Deserialize)]
pub struct SymbolQuery {
    pub coin_symbol: String,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Every tool answers with user-facing text plus the structured result.
#[derive(Debug, Serialize)]
pub struct ToolResponse<T> {
    pub message: String,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct WatchlistChange {
    pub id: String,
    pub changed: bool,
    pub watchlist: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PriceEntry {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PriceSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FetchError>,
}

#[derive(Serialize)]
pub struct PromptResponse {
    pub prompt: String,
}

type ToolResult<T> = Result<Json<ToolResponse<T>>, AppError>;

// ---------------------------------------------------------------------------
// Tool handlers
// ---------------------------------------------------------------------------

async fn get_watchlist(State(state): State<ApiState>) -> Json<ToolResponse<Vec<String>>> {
    let ids = state.tracker.get_watchlist();
    Json(ToolResponse {
        message: watchlist_message(&ids),
        data: ids,
    })
}

async fn add_to_watchlist(
    State(state): State<ApiState>,
    Json(req): Json<CoinRequest>,
) -> ToolResult<WatchlistChange> {
    let id = normalize_asset_id(&req.id)?;
    let added = state.tracker.add_to_watchlist(&id)?;
    let message = if added {
        format!("Added {id} to your watchlist.")
    } else {
        format!("{id} is already in your watchlist.")
    };
    Ok(Json(ToolResponse {
        message,
        data: WatchlistChange {
            id,
            changed: added,
            watchlist: state.tracker.get_watchlist(),
        },
    }))
}

async fn remove_from_watchlist(
    State(state): State<ApiState>,
    Json(req): Json<CoinRequest>,
) -> ToolResult<WatchlistChange> {
    let id = normalize_asset_id(&req.id)?;
    let removed = state.tracker.remove_from_watchlist(&id)?;
    let message = if removed {
        format!("Removed {id} from your watchlist.")
    } else {
        format!("{id} is not in your watchlist.")
    };
    Ok(Json(ToolResponse {
        message,
        data: WatchlistChange {
            id,
            changed: removed,
            watchlist: state.tracker.get_watchlist(),
        },
    }))
}

async fn fetch_prices(State(state): State<ApiState>) -> Json<ToolResponse<Vec<PriceEntry>>> {
    let outcomes = state.tracker.fetch_prices().await;
    let message = prices_message(&outcomes);
    let data = outcomes
        .into_iter()
        .map(|(id, outcome)| match outcome {
            Ok(snapshot) => PriceEntry {
                id,
                snapshot: Some(snapshot),
                error: None,
            },
            Err(error) => PriceEntry {
                id,
                snapshot: None,
                error: Some(error),
            },
        })
        .collect();
    Json(ToolResponse { message, data })
}

async fn export_to_sheets(
    State(state): State<ApiState>,
    Json(req): Json<ExportRequest>,
) -> ToolResult<ExportReport> {
    let report = state
        .tracker
        .export_to_sheets(&req.sheet_name, &req.user_email)
        .await?;
    Ok(Json(ToolResponse {
        message: export_message(&report),
        data: report,
    }))
}

async fn get_sheet_performance_leaders(
    State(state): State<ApiState>,
    Json(req): Json<SheetRequest>,
) -> ToolResult<PerformanceReport> {
    let report = state.tracker.performance_leaders(&req.sheet_name).await?;
    Ok(Json(ToolResponse {
        message: performance_message(&report),
        data: report,
    }))
}

// ---------------------------------------------------------------------------
// Prompt handlers
// ---------------------------------------------------------------------------

async fn add_coin_prompt(Query(q): Query<SymbolQuery>) -> Result<Json<PromptResponse>, AppError> {
    Ok(Json(PromptResponse {
        prompt: prompts::add_coin(&q.coin_symbol)?,
    }))
}

async fn remove_coin_prompt(Query(q): Query<SymbolQuery>) -> Result<Json<PromptResponse>, AppError> {
    Ok(Json(PromptResponse {
        prompt: prompts::remove_coin(&q.coin_symbol)?,
    }))
}

async fn get_prices_prompt() -> Json<PromptResponse> {
    Json(PromptResponse {
        prompt: prompts::get_prices(),
    })
}

async fn export_prompt(Query(q): Query<ExportRequest>) -> Json<PromptResponse> {
    Json(PromptResponse {
        prompt: prompts::export(&q.sheet_name, &q.user_email),
    })
}

// ---------------------------------------------------------------------------
// Service endpoints
// ---------------------------------------------------------------------------

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "watchlist_size": state.tracker.get_watchlist().len(),
        "sheets_enabled": state.tracker.sheets_enabled(),
    }))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "quotes": state.quote_latency.summary(),
        "sheets": state.sheets_latency.summary(),
    }))
}

// ---------------------------------------------------------------------------
// Message text
// ---------------------------------------------------------------------------

fn watchlist_message(ids: &[String]) -> String {
    if ids.is_empty() {
        return "Your watchlist is empty.".to_string();
    }
    let mut lines = vec!["Current Watchlist:".to_string()];
    lines.extend(ids.iter().map(|id| format!("- {id}")));
    lines.join("\n")
}

fn prices_message<'a>(outcomes: impl IntoIterator<Item = (&'a String, &'a FetchOutcome)>) -> String {
    let lines: Vec<String> = outcomes
        .into_iter()
        .map(|(id, outcome)| match outcome {
            Ok(s) => {
                let change = s
                    .change_24h
                    .map(|c| format!("{}%", c.round_dp(2)))
                    .unwrap_or_else(|| "n/a".to_string());
                format!("{id}: ${} ({change})", s.price)
            }
            Err(e) => format!("{id}: Failed to fetch price ({e})"),
        })
        .collect();
    if lines.is_empty() {
        return "Your watchlist is empty. Add coins using the add_to_watchlist tool.".to_string();
    }
    format!("Current prices:\n{}", lines.join("\n"))
}

fn export_message(report: &ExportReport) -> String {
    let mut msg = format!(
        "Successfully exported price data to '{}' sheet.\nURL: {}\nShared with {}.",
        report.sheet_name, report.url, report.shared_with
    );
    if !report.skipped.is_empty() {
        let skipped: Vec<String> = report
            .skipped
            .iter()
            .map(|s| format!("{} ({})", s.id, s.error))
            .collect();
        msg.push_str(&format!("\nSkipped: {}", skipped.join(", ")));
    }
    msg
}

fn performance_message(report: &PerformanceReport) -> String {
    let mut msg = match &report.result {
        PerformanceResult::Leaders {
            top_gainer,
            top_loser,
        } => format!(
            "Top gainer in '{}': {} ({}%)\nTop loser: {} ({}%)",
            report.sheet_name, top_gainer.id, top_gainer.change_24h, top_loser.id, top_loser.change_24h
        ),
        PerformanceResult::EmptyDataset => {
            format!("No rows with a 24h change found in '{}'.", report.sheet_name)
        }
    };
    if !report.diagnostics.is_empty() {
        msg.push_str(&format!("\n{} row(s) skipped as invalid.", report.diagnostics.len()));
    }
    msg
}
