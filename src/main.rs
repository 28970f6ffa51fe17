mod analyzer;
mod api;
mod config;
mod error;
mod latency;
mod quotes;
mod retry;
mod sheets;
mod tracker;
mod types;
mod watchlist;

#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::error::Result;
use crate::latency::LatencyStats;
use crate::quotes::{CoinGeckoClient, PriceAggregator};
use crate::retry::RetryPolicy;
use crate::sheets::auth::ServiceAccountKey;
use crate::sheets::{GoogleSheetsBackend, SpreadsheetGateway};
use crate::tracker::Tracker;
use crate::watchlist::{JsonFileStorage, WatchlistStore};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let retry = RetryPolicy::new(&cfg.retry);

    // --- Watchlist ---
    let storage = Arc::new(JsonFileStorage::new(&cfg.watchlist_path));
    let watchlist = WatchlistStore::load(storage)?;
    info!("Watchlist persisted at {}", cfg.watchlist_path);

    // --- Quote service ---
    let quote_latency = Arc::new(LatencyStats::new());
    let coingecko = CoinGeckoClient::new(&cfg, Arc::clone(&quote_latency))?;
    let prices = PriceAggregator::new(Arc::new(coingecko), retry.clone(), cfg.quote_batch_size);
    info!(
        "Quote service at {} (batch size {}, {} attempts per call)",
        cfg.coingecko_base_url,
        cfg.quote_batch_size,
        retry.max_attempts()
    );

    // --- Spreadsheets (optional) ---
    let sheets_latency = Arc::new(LatencyStats::new());
    let sheets = connect_sheets(&cfg, &sheets_latency, &retry);

    let tracker = Tracker::new(watchlist, prices, sheets);

    // --- HTTP API ---
    let app = router(ApiState {
        tracker,
        quote_latency,
        sheets_latency,
    });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Spreadsheet features stay off when the key file is absent or unusable.
fn connect_sheets(
    cfg: &Config,
    latency: &Arc<LatencyStats>,
    retry: &RetryPolicy,
) -> Option<SpreadsheetGateway> {
    if !Path::new(&cfg.credentials_path).exists() {
        warn!(
            "Google credentials not found at '{}'; spreadsheet tools are disabled",
            cfg.credentials_path
        );
        return None;
    }

    let backend = ServiceAccountKey::from_file(&cfg.credentials_path)
        .and_then(|key| GoogleSheetsBackend::new(cfg, key, Arc::clone(latency)));
    match backend {
        Ok(backend) => {
            info!(
                "Spreadsheet access as {} using {}",
                backend.service_account(),
                cfg.credentials_path
            );
            Some(SpreadsheetGateway::new(Arc::new(backend), retry.clone()))
        }
        Err(e) => {
            warn!("Spreadsheet tools are disabled: {e}");
            None
        }
    }
}
