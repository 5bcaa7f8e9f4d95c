//! Unified prediction-market listing: native ledger markets plus an
//! external regulated feed, each row tagged with where it came from.

use crate::models::{ListedMarket, MarketCategory, PredictionMarket, Provenance};
use crate::store::ReadModelStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub const EXTERNAL_ORACLE: &str = "Kalshi Regulated";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("{feed} unavailable: {reason}")]
    Unavailable { feed: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// A market as delivered by an external feed. Prices are in cents.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalMarket {
    pub id: String,
    pub title: String,
    pub volume: f64,
    pub yes_bid: Option<u32>,
    pub yes_ask: Option<u32>,
    pub expiration: Option<DateTime<Utc>>,
    pub category: Option<String>,
}

#[async_trait]
pub trait MarketFeed: Send + Sync {
    fn source_name(&self) -> &str;

    async fn fetch_markets(&self) -> Result<Vec<ExternalMarket>, FeedError>;
}

pub fn map_category(category: Option<&str>) -> MarketCategory {
    match category.map(str::trim) {
        Some("Economics") | Some("Financials") => MarketCategory::Corporate,
        Some("Climate") | Some("Weather") => MarketCategory::Atmospheric,
        Some("Politics") | Some("Government") => MarketCategory::Governance,
        _ => MarketCategory::Commodities,
    }
}

/// Midpoint of the yes bid/ask, as a probability rounded to 2 decimals.
/// A zero or missing bid counts as 0, a zero or missing ask as 100.
pub fn implied_probability(yes_bid: Option<u32>, yes_ask: Option<u32>) -> f64 {
    let bid = yes_bid.filter(|&c| c > 0).unwrap_or(0);
    let ask = yes_ask.filter(|&c| c > 0).unwrap_or(100);
    let mid = (bid + ask) as f64 / 2.0 / 100.0;
    ((mid * 100.0).round() / 100.0).clamp(0.0, 1.0)
}

pub fn external_to_prediction(market: &ExternalMarket) -> PredictionMarket {
    PredictionMarket {
        id: market.id.clone(),
        question: market.title.clone(),
        category: map_category(market.category.as_deref()),
        volume: market.volume,
        liquidity: 0.0,
        prob_yes: implied_probability(market.yes_bid, market.yes_ask),
        ends_at: market.expiration,
        description: Some(format!("Traded on Kalshi. Ticker: {}", market.id)),
        oracle: Some(EXTERNAL_ORACLE.to_string()),
        resolved: false,
    }
}

/// Native rows first, then external rows. An external row whose id is
/// already listed natively is dropped.
pub fn merge_markets(
    native: Vec<PredictionMarket>,
    external: Vec<PredictionMarket>,
) -> Vec<ListedMarket> {
    let native_ids: HashSet<String> = native.iter().map(|m| m.id.clone()).collect();
    let mut listed: Vec<ListedMarket> = native
        .into_iter()
        .map(|market| ListedMarket {
            market,
            provenance: Provenance::Native,
        })
        .collect();

    for market in external {
        if native_ids.contains(&market.id) {
            debug!(id = %market.id, "External market shadowed by native market");
            continue;
        }
        listed.push(ListedMarket {
            market,
            provenance: Provenance::ExternalRegulated,
        });
    }
    listed
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedMarkets {
    pub markets: Vec<ListedMarket>,
    /// False when the external feed could not be reached for this listing
    pub external_available: bool,
}

pub struct MarketAggregator {
    store: Arc<ReadModelStore>,
    feed: Option<Arc<dyn MarketFeed>>,
}

impl MarketAggregator {
    pub fn new(store: Arc<ReadModelStore>, feed: Option<Arc<dyn MarketFeed>>) -> Self {
        Self { store, feed }
    }

    /// Never fails: a feed outage yields the native markets only
    pub async fn unified_markets(&self) -> UnifiedMarkets {
        let native = self.store.get_native_markets().await;

        let Some(feed) = &self.feed else {
            return UnifiedMarkets {
                markets: merge_markets(native, Vec::new()),
                external_available: false,
            };
        };

        match feed.fetch_markets().await {
            Ok(external) => {
                let external = external.iter().map(external_to_prediction).collect();
                UnifiedMarkets {
                    markets: merge_markets(native, external),
                    external_available: true,
                }
            }
            Err(e) => {
                warn!(
                    mode = "degraded",
                    feed = feed.source_name(),
                    "External market feed failed, listing native markets only: {}",
                    e
                );
                UnifiedMarkets {
                    markets: merge_markets(native, Vec::new()),
                    external_available: false,
                }
            }
        }
    }
}
