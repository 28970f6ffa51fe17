use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

use crate::types::ExportStage;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout, rate-limit or 5xx. Retried by `RetryPolicy`, never surfaced raw
    /// once the retry budget applies.
    #[error("Transient upstream failure: {0}")]
    Transient(String),

    #[error("{target} unavailable after {attempts} attempt(s): {cause}")]
    Unavailable {
        target: String,
        attempts: u32,
        cause: String,
    },

    #[error("Upstream rejected request: {0}")]
    Permanent(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Watchlist storage at {path} is corrupt: {reason}")]
    StorageCorrupt { path: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Export failed during {stage}: {source}")]
    Export {
        stage: ExportStage,
        #[source]
        source: Box<AppError>,
    },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Whether the failure qualifies for a local retry.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Transient(_) => true,
            AppError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    pub fn export(stage: ExportStage, source: AppError) -> Self {
        AppError::Export {
            stage,
            source: Box::new(source),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Permission(_) => StatusCode::FORBIDDEN,
            AppError::Transient(_) | AppError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Permanent(_) | AppError::Http(_) => StatusCode::BAD_GATEWAY,
            AppError::Export { source, .. } => source.status(),
            AppError::StorageCorrupt { .. }
            | AppError::Config(_)
            | AppError::Json(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Map a non-success HTTP response onto the shared error taxonomy.
/// Used by both the quote client and the Google backend so retry decisions agree.
pub fn classify_http(status: reqwest::StatusCode, context: &str, body: &str) -> AppError {
    let detail = format!("{context}: HTTP {} {}", status.as_u16(), truncate(body, 200));
    match status.as_u16() {
        408 | 429 | 500..=599 => AppError::Transient(detail),
        403 if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") => {
            AppError::Transient(detail)
        }
        403 => AppError::Permission(detail),
        404 => AppError::NotFound(detail),
        _ => AppError::Permanent(detail),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), self.to_string()).into_response()
    }
}
