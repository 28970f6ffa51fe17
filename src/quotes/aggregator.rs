use std::sync::Arc;

use futures_util::future::join_all;
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::config::QUOTE_CURRENCY;
use crate::error::AppError;
use crate::quotes::QuoteSource;
use crate::retry::RetryPolicy;
use crate::types::{FetchError, PriceSnapshot};

pub type FetchOutcome = std::result::Result<PriceSnapshot, FetchError>;

/// Fans a set of ids out into upstream batches and folds the answers back
/// into one per-id result map. A failing batch only affects its own ids.
pub struct PriceAggregator {
    source: Arc<dyn QuoteSource>,
    retry: RetryPolicy,
    batch_size: usize,
}

impl PriceAggregator {
    pub fn new(source: Arc<dyn QuoteSource>, retry: RetryPolicy, batch_size: usize) -> Self {
        Self {
            source,
            retry,
            batch_size: batch_size.max(1),
        }
    }

    /// Keys follow the order of `ids`; repeated ids are fetched once.
    pub async fn fetch(&self, ids: &[String]) -> IndexMap<String, FetchOutcome> {
        let mut unique: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(id) {
                unique.push(id.clone());
            }
        }
        if unique.is_empty() {
            return IndexMap::new();
        }

        let batches = unique.chunks(self.batch_size).map(|chunk| self.fetch_batch(chunk));
        let mut by_id: IndexMap<String, FetchOutcome> =
            join_all(batches).await.into_iter().flatten().collect();

        // Restore input order across batches.
        let mut ordered = IndexMap::with_capacity(unique.len());
        for id in unique {
            if let Some(outcome) = by_id.swap_remove(&id) {
                ordered.insert(id, outcome);
            }
        }

        let ok = ordered.values().filter(|o| o.is_ok()).count();
        info!("Fetched {ok}/{} price snapshots", ordered.len());
        ordered
    }

    async fn fetch_batch(&self, ids: &[String]) -> Vec<(String, FetchOutcome)> {
        let result = self
            .retry
            .run("quote service", || self.source.quote_batch(ids, QUOTE_CURRENCY))
            .await;

        match result {
            Ok(mut batch) => ids
                .iter()
                .map(|id| {
                    let outcome = match batch.remove(id) {
                        Some(Ok(snapshot)) => Ok(snapshot),
                        Some(Err(reason)) => {
                            warn!("Discarding malformed quote for {id}: {reason}");
                            Err(FetchError::Malformed { reason })
                        }
                        None => Err(FetchError::NotFound),
                    };
                    (id.clone(), outcome)
                })
                .collect(),
            Err(AppError::Unavailable { attempts, cause, .. }) => {
                warn!("Quote batch of {} ids unavailable after {attempts} attempt(s): {cause}", ids.len());
                ids.iter()
                    .map(|id| {
                        let err = FetchError::Unavailable {
                            attempts,
                            cause: cause.clone(),
                        };
                        (id.clone(), Err(err))
                    })
                    .collect()
            }
            Err(e) => {
                warn!("Quote batch of {} ids rejected: {e}", ids.len());
                let cause = e.to_string();
                ids.iter()
                    .map(|id| (id.clone(), Err(FetchError::Rejected { cause: cause.clone() })))
                    .collect()
            }
        }
    }
}
