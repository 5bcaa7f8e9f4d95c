//! Unified prediction-market listing tests
//!
//! Native markets come from the in-process ledger; the external feed is
//! replaced by fixed or failing feeds.

mod common;

use async_trait::async_trait;
use common::{harness_with_markets, put_market};
use marscorp_core::markets::{ExternalMarket, FeedError, MarketAggregator, MarketFeed, EXTERNAL_ORACLE};
use marscorp_core::models::{ListedMarket, MarketCategory, Provenance};
use marscorp_core::MarketId;
use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct DownFeed {
    calls: AtomicUsize,
}

#[async_trait]
impl MarketFeed for DownFeed {
    fn source_name(&self) -> &str {
        "kalshi"
    }

    async fn fetch_markets(&self) -> Result<Vec<ExternalMarket>, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FeedError::Unavailable {
            feed: "kalshi".to_string(),
            reason: "circuit breaker open".to_string(),
        })
    }
}

struct FixedFeed(Vec<ExternalMarket>);

#[async_trait]
impl MarketFeed for FixedFeed {
    fn source_name(&self) -> &str {
        "fixed"
    }

    async fn fetch_markets(&self) -> Result<Vec<ExternalMarket>, FeedError> {
        Ok(self.0.clone())
    }
}

fn external(id: &str, category: &str) -> ExternalMarket {
    ExternalMarket {
        id: id.to_string(),
        title: format!("External market {}", id),
        volume: 2_500.0,
        yes_bid: Some(61),
        yes_ask: Some(65),
        expiration: None,
        category: Some(category.to_string()),
    }
}

#[tokio::test]
async fn test_feed_outage_lists_native_markets_only() {
    let h = harness_with_markets(vec![MarketId::Numeric(1), MarketId::Numeric(2)]);
    put_market(&h.ledger, 1, "Will the Valles aqueduct open?", Pubkey::new_unique(), false);
    put_market(&h.ledger, 2, "Will HE3 output double?", Pubkey::new_unique(), false);

    let feed = Arc::new(DownFeed {
        calls: AtomicUsize::new(0),
    });
    let shared: Arc<dyn MarketFeed> = feed.clone();
    let aggregator = MarketAggregator::new(h.store.clone(), Some(shared));

    let listing = aggregator.unified_markets().await;

    assert!(!listing.external_available);
    assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    assert_eq!(listing.markets.len(), 2);
    assert!(listing
        .markets
        .iter()
        .all(|m| m.provenance == Provenance::Native));
    assert_eq!(
        listing.markets,
        h.store
            .get_native_markets()
            .await
            .into_iter()
            .map(|market| ListedMarket {
                market,
                provenance: Provenance::Native,
            })
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_native_rows_lead_and_shadow_external_ids() {
    let h = harness_with_markets(vec![MarketId::Numeric(7)]);
    put_market(&h.ledger, 7, "Will dust season end early?", Pubkey::new_unique(), false);

    let feed: Arc<dyn MarketFeed> = Arc::new(FixedFeed(vec![
        external("7", "Economics"),
        external("KXRAIN", "Climate"),
    ]));
    let aggregator = MarketAggregator::new(h.store.clone(), Some(feed));

    let listing = aggregator.unified_markets().await;

    assert!(listing.external_available);
    let ids: Vec<_> = listing.markets.iter().map(|m| m.market.id.as_str()).collect();
    assert_eq!(ids, vec!["7", "KXRAIN"]);

    let native = &listing.markets[0];
    assert_eq!(native.provenance, Provenance::Native);
    assert_eq!(native.market.question, "Will dust season end early?");
    // 3 of 4 SOL in the pool are on yes
    assert_eq!(native.market.prob_yes, 0.75);

    let regulated = &listing.markets[1];
    assert_eq!(regulated.provenance, Provenance::ExternalRegulated);
    assert_eq!(regulated.market.category, MarketCategory::Atmospheric);
    assert_eq!(regulated.market.prob_yes, 0.63);
    assert_eq!(regulated.market.oracle.as_deref(), Some(EXTERNAL_ORACLE));
}

#[tokio::test]
async fn test_missing_native_market_is_omitted() {
    let h = harness_with_markets(vec![MarketId::Numeric(3), MarketId::parse("KXGDP-26")]);
    put_market(&h.ledger, 3, "Will the orbital mirror launch?", Pubkey::new_unique(), true);

    let aggregator = MarketAggregator::new(h.store.clone(), None);
    let listing = aggregator.unified_markets().await;

    assert!(!listing.external_available);
    assert_eq!(listing.markets.len(), 1);
    assert!(listing.markets[0].market.resolved);
    assert_eq!(
        listing.markets[0].market.description.as_deref(),
        Some("Resolved YES")
    );
}

#[tokio::test]
async fn test_tracked_market_is_listed_after_invalidation() {
    let h = harness_with_markets(Vec::new());
    assert!(h.store.get_native_markets().await.is_empty());

    put_market(&h.ledger, 11, "Will the skyhook pass inspection?", Pubkey::new_unique(), false);
    h.store.track_market(MarketId::Numeric(11));

    let markets = h.store.get_native_markets().await;
    assert_eq!(markets.len(), 1);
    assert_eq!(markets[0].id, "11");
}
