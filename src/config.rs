use std::time::Duration;

use crate::error::{AppError, Result};

pub const COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4";
pub const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";

/// OAuth scopes requested for the service account.
pub const GOOGLE_SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive.file";

/// All snapshots are quoted in this currency.
pub const QUOTE_CURRENCY: &str = "usd";

/// CoinGecko accepts long id lists but truncates silently past a few hundred.
pub const DEFAULT_QUOTE_BATCH_SIZE: usize = 250;

/// Fixed column layout of the export sheet, columns A..E.
pub const SHEET_COLUMNS: [&str; 5] = ["id", "price", "change_24h", "currency", "exported_at"];
pub const SHEET_RANGE: &str = "A:E";

/// Access tokens are refreshed this long before Google says they expire.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Applied to every single attempt, not to the whole retry sequence.
    pub attempt_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub api_port: u16,
    /// Ordered JSON array of asset ids (WATCHLIST_PATH)
    pub watchlist_path: String,
    /// Service-account key file (GOOGLE_CREDENTIALS_PATH)
    pub credentials_path: String,
    pub coingecko_base_url: String,
    pub coingecko_api_key: Option<String>,
    pub sheets_api_url: String,
    pub drive_api_url: String,
    /// Max ids per upstream quote request (QUOTE_BATCH_SIZE)
    pub quote_batch_size: usize,
    pub retry: RetrySettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let quote_batch_size = parse_env("QUOTE_BATCH_SIZE", DEFAULT_QUOTE_BATCH_SIZE)?;
        if quote_batch_size == 0 {
            return Err(AppError::Config("QUOTE_BATCH_SIZE must be at least 1".to_string()));
        }
        let max_attempts = parse_env("RETRY_MAX_ATTEMPTS", 3u32)?;
        if max_attempts == 0 {
            return Err(AppError::Config("RETRY_MAX_ATTEMPTS must be at least 1".to_string()));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            watchlist_path: std::env::var("WATCHLIST_PATH")
                .unwrap_or_else(|_| "watchlist.json".to_string()),
            credentials_path: std::env::var("GOOGLE_CREDENTIALS_PATH")
                .unwrap_or_else(|_| "google_credentials.json".to_string()),
            coingecko_base_url: std::env::var("COINGECKO_BASE_URL")
                .unwrap_or_else(|_| COINGECKO_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            coingecko_api_key: std::env::var("COINGECKO_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            sheets_api_url: SHEETS_API_URL.to_string(),
            drive_api_url: DRIVE_API_URL.to_string(),
            quote_batch_size,
            retry: RetrySettings {
                max_attempts,
                base_delay: Duration::from_millis(parse_env("RETRY_BASE_DELAY_MS", 500u64)?),
                max_delay: Duration::from_millis(parse_env("RETRY_MAX_DELAY_MS", 8_000u64)?),
                attempt_timeout: Duration::from_secs(parse_env("REQUEST_TIMEOUT_SECS", 10u64)?),
            },
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} must be a number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
