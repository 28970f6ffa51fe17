pub mod aggregator;
pub mod coingecko;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::PriceSnapshot;

pub use aggregator::PriceAggregator;
pub use coingecko::CoinGeckoClient;

/// Result of one upstream request, keyed by asset id.
/// Ids the upstream does not know are absent; entries that fail field
/// validation carry the reason instead of a snapshot.
pub type QuoteBatch = HashMap<String, std::result::Result<PriceSnapshot, String>>;

/// Upstream quote service.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// One request for `ids`, priced in `currency`. Implementations perform a
    /// single attempt; retries belong to the caller.
    async fn quote_batch(&self, ids: &[String], currency: &str) -> Result<QuoteBatch>;
}
