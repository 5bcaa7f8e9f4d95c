//! Kalshi public market-data client.
//!
//! Read-only: lists open markets for the unified prediction-market view.
//! Requests are gated by a circuit breaker so an outage costs one failed
//! call per recovery window instead of one per listing.

use crate::circuit_breaker::{ApiCircuitBreaker, ApiCircuitBreakerConfig};
use crate::markets::{ExternalMarket, FeedError, MarketFeed};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const KALSHI_API_PROD: &str = "https://api.elections.kalshi.com/trade-api/v2";
const DEFAULT_MARKET_LIMIT: u32 = 20;

#[derive(Clone)]
pub struct KalshiClient {
    client: Client,
    base_url: String,
    market_limit: u32,
    circuit_breaker: Arc<ApiCircuitBreaker>,
}

impl std::fmt::Debug for KalshiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KalshiClient")
            .field("base_url", &self.base_url)
            .field("market_limit", &self.market_limit)
            .field("circuit_breaker_state", &self.circuit_breaker.state())
            .finish()
    }
}

/// Market as returned by `GET /markets`. Prices are in cents.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KalshiMarket {
    pub ticker: String,
    pub title: String,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub yes_bid: Option<u32>,
    #[serde(default)]
    pub yes_ask: Option<u32>,
    #[serde(default)]
    pub expiration_time: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl From<KalshiMarket> for ExternalMarket {
    fn from(market: KalshiMarket) -> Self {
        let expiration = market
            .expiration_time
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| at.with_timezone(&Utc));
        ExternalMarket {
            id: market.ticker,
            title: market.title,
            volume: market.volume.unwrap_or(0.0),
            yes_bid: market.yes_bid,
            yes_ask: market.yes_ask,
            expiration,
            category: market.category,
        }
    }
}

impl KalshiClient {
    fn create_circuit_breaker() -> Arc<ApiCircuitBreaker> {
        // Tighter threshold and longer recovery than the generic defaults
        let defaults = ApiCircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            ..ApiCircuitBreakerConfig::default()
        };
        Arc::new(ApiCircuitBreaker::new(
            "kalshi",
            ApiCircuitBreakerConfig::from_env("KALSHI", defaults),
        ))
    }

    pub fn new(base_url: &str, market_limit: u32) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            market_limit,
            circuit_breaker: Self::create_circuit_breaker(),
        })
    }

    /// Reads `KALSHI_BASE_URL` and `KALSHI_MARKET_LIMIT`
    pub fn from_env() -> Result<Self, FeedError> {
        let base_url =
            env::var("KALSHI_BASE_URL").unwrap_or_else(|_| KALSHI_API_PROD.to_string());
        let market_limit = env::var("KALSHI_MARKET_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MARKET_LIMIT);
        Self::new(&base_url, market_limit)
    }

    pub fn circuit_breaker(&self) -> &ApiCircuitBreaker {
        &self.circuit_breaker
    }

    /// Open markets, gated by the circuit breaker
    pub async fn get_markets(&self) -> Result<Vec<KalshiMarket>, FeedError> {
        if !self.circuit_breaker.is_available() {
            return Err(FeedError::Unavailable {
                feed: "kalshi".to_string(),
                reason: "circuit breaker open".to_string(),
            });
        }

        let result = self.get_markets_internal().await;
        match &result {
            Ok(markets) => {
                self.circuit_breaker.record_success();
                debug!(count = markets.len(), "Fetched Kalshi markets");
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                warn!("Kalshi markets request failed: {}", e);
            }
        }
        result
    }

    async fn get_markets_internal(&self) -> Result<Vec<KalshiMarket>, FeedError> {
        let url = format!("{}/markets", self.base_url);
        let limit = self.market_limit.to_string();
        let params = [("limit", limit.as_str()), ("status", "open")];

        let resp = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?;

        let data: serde_json::Value = resp.json().await?;
        parse_markets(&data)
    }
}

fn parse_markets(data: &serde_json::Value) -> Result<Vec<KalshiMarket>, FeedError> {
    match data.get("markets") {
        Some(v) if !v.is_null() => serde_json::from_value(v.clone())
            .map_err(|e| FeedError::Decode(format!("markets: {}", e))),
        _ => Ok(Vec::new()),
    }
}

#[async_trait]
impl MarketFeed for KalshiClient {
    fn source_name(&self) -> &str {
        "kalshi"
    }

    async fn fetch_markets(&self) -> Result<Vec<ExternalMarket>, FeedError> {
        Ok(self
            .get_markets()
            .await?
            .into_iter()
            .map(ExternalMarket::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_creation() {
        let client = KalshiClient::new("https://example.invalid/trade-api/v2/", 5)
            .expect("Failed to create client");
        assert_eq!(client.base_url, "https://example.invalid/trade-api/v2");
        assert_eq!(client.market_limit, 5);
    }

    #[test]
    fn test_parse_markets_payload() {
        let data = json!({
            "markets": [{
                "ticker": "KXFED-25DEC",
                "title": "Fed cuts in December?",
                "volume": 1520,
                "yes_bid": 41,
                "yes_ask": 43,
                "expiration_time": "2025-12-31T00:00:00Z",
                "category": "Economics",
                "status": "open"
            }],
            "cursor": ""
        });
        let markets = parse_markets(&data).unwrap();
        assert_eq!(markets.len(), 1);

        let external = ExternalMarket::from(markets[0].clone());
        assert_eq!(external.id, "KXFED-25DEC");
        assert_eq!(external.volume, 1520.0);
        assert_eq!(external.yes_bid, Some(41));
        assert!(external.expiration.is_some());
    }

    #[test]
    fn test_null_markets_is_empty() {
        assert!(parse_markets(&json!({ "markets": null })).unwrap().is_empty());
        assert!(parse_markets(&json!({})).unwrap().is_empty());
        assert!(parse_markets(&json!({ "markets": 3 })).is_err());
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits() {
        let client = KalshiClient::new("http://127.0.0.1:9", 1).unwrap();
        for _ in 0..3 {
            client.circuit_breaker().record_failure();
        }
        let err = client.get_markets().await.unwrap_err();
        assert!(matches!(err, FeedError::Unavailable { .. }));
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_live_markets() {
        let client = KalshiClient::from_env().unwrap();
        let markets = client.fetch_markets().await.unwrap();
        assert!(markets.len() <= DEFAULT_MARKET_LIMIT as usize);
    }
}
