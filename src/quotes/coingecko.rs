use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{classify_http, AppError, Result};
use crate::latency::LatencyStats;
use crate::quotes::{QuoteBatch, QuoteSource};
use crate::types::PriceSnapshot;

/// CoinGecko `simple/price` client.
pub struct CoinGeckoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    latency: Arc<LatencyStats>,
}

impl CoinGeckoClient {
    pub fn new(cfg: &Config, latency: Arc<LatencyStats>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent("crypto-sheets-tracker")
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.coingecko_base_url.clone(),
            api_key: cfg.coingecko_api_key.clone(),
            latency,
        })
    }
}

#[async_trait]
impl QuoteSource for CoinGeckoClient {
    async fn quote_batch(&self, ids: &[String], currency: &str) -> Result<QuoteBatch> {
        let url = format!("{}/simple/price", self.base_url);
        let mut req = self.http.get(&url).query(&[
            ("ids", ids.join(",")),
            ("vs_currencies", currency.to_string()),
            ("include_24hr_change", "true".to_string()),
            ("include_last_updated_at", "true".to_string()),
        ]);
        if let Some(key) = &self.api_key {
            req = req.header("x-cg-demo-api-key", key);
        }

        let started = Instant::now();
        let resp = req.send().await;
        self.latency.record(started.elapsed());
        let resp = resp?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_http(status, "CoinGecko simple/price", &body));
        }

        let body: Value = resp.json().await?;
        let batch = parse_simple_price(&body, currency, Utc::now())?;
        debug!("CoinGecko returned {} of {} requested ids", batch.len(), ids.len());
        Ok(batch)
    }
}

/// Validate a `simple/price` body entry by entry.
/// Only a body that is not a JSON object fails as a whole.
pub fn parse_simple_price(body: &Value, currency: &str, fetched_at: DateTime<Utc>) -> Result<QuoteBatch> {
    let entries = body.as_object().ok_or_else(|| {
        AppError::Permanent("CoinGecko simple/price response was not a JSON object".to_string())
    })?;

    Ok(entries
        .iter()
        .map(|(id, entry)| (id.clone(), parse_entry(id, entry, currency, fetched_at)))
        .collect())
}

fn parse_entry(
    id: &str,
    entry: &Value,
    currency: &str,
    fetched_at: DateTime<Utc>,
) -> std::result::Result<PriceSnapshot, String> {
    let fields = entry
        .as_object()
        .ok_or_else(|| format!("entry is not an object: {entry}"))?;

    let price = fields
        .get(currency)
        .ok_or_else(|| format!("missing {currency} price"))
        .and_then(|v| json_decimal(v).map_err(|e| format!("{currency} price {e}")))?;
    if price.is_sign_negative() {
        return Err(format!("negative price {price}"));
    }

    let change_key = format!("{currency}_24h_change");
    let change_24h = match fields.get(&change_key) {
        None | Some(Value::Null) => None,
        Some(v) => Some(json_decimal(v).map_err(|e| format!("{change_key} {e}"))?),
    };

    let timestamp = fields
        .get("last_updated_at")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(fetched_at);

    Ok(PriceSnapshot {
        id: id.to_string(),
        price,
        change_24h,
        currency: currency.to_string(),
        timestamp,
    })
}

/// Decimal from a JSON number, keeping the digits exactly as sent.
fn json_decimal(v: &Value) -> std::result::Result<Decimal, String> {
    let Value::Number(n) = v else {
        return Err(format!("is not a number: {v}"));
    };
    let text = n.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| format!("{text} is not representable: {e}"))
}
