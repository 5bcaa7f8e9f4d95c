//! Indexer service: keeps the MarsCorp read model in step with the ledger.
//!
//! Wires the durable backend, the RPC ledger client and the log
//! subscription into the core library, runs the event ingestor and
//! refreshes the cached views on a fixed interval.

pub mod config;

pub use config::IndexerConfig;

use anyhow::{Context, Result};
use marscorp_core::clients::KalshiClient;
use marscorp_core::db::{create_pool, DbPoolConfig, MemoryBackend, PgBackend, ReadModelBackend, RetryPolicy};
use marscorp_core::ledger::{LogSubscription, ReconnectConfig, RpcLedger};
use marscorp_core::markets::{MarketAggregator, MarketFeed};
use marscorp_core::store::ReadModelConfig;
use marscorp_core::{AddressDeriver, EventIngestor, LedgerPoller, ReadModelStore};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct Indexer {
    config: IndexerConfig,
    store: Arc<ReadModelStore>,
    aggregator: MarketAggregator,
}

/// Counts from one warm cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmSummary {
    pub businesses: usize,
    pub markets: usize,
    pub external_available: bool,
    pub degraded: bool,
}

fn backend(config: &IndexerConfig) -> Arc<dyn ReadModelBackend> {
    let Some(url) = config.database_url.as_deref() else {
        warn!(mode = "degraded", "DATABASE_URL not set, using in-memory read model");
        return Arc::new(MemoryBackend::new());
    };
    match create_pool(url, DbPoolConfig::from_env()) {
        Ok(pool) => Arc::new(PgBackend::new(pool)),
        Err(e) => {
            error!(mode = "degraded", "Invalid database configuration, using in-memory read model: {:#}", e);
            Arc::new(MemoryBackend::new())
        }
    }
}

impl Indexer {
    pub fn new(config: IndexerConfig) -> Result<Self> {
        let core = &config.core;
        let ledger = Arc::new(RpcLedger::new(&core.rpc_url));
        let poller = LedgerPoller::new(
            ledger,
            AddressDeriver::new(core.program_id),
            core.seed_wallet,
            core.fetch_timeout,
        );
        let store = Arc::new(ReadModelStore::new(
            backend(&config),
            poller,
            ReadModelConfig::from(core),
        ));

        let feed: Option<Arc<dyn MarketFeed>> = if config.external_feed_enabled {
            Some(Arc::new(
                KalshiClient::from_env().context("Failed to create Kalshi client")?,
            ))
        } else {
            None
        };
        let aggregator = MarketAggregator::new(store.clone(), feed);

        Ok(Self {
            config,
            store,
            aggregator,
        })
    }

    pub fn store(&self) -> &Arc<ReadModelStore> {
        &self.store
    }

    /// Refresh every cached view once
    pub async fn warm(&self) -> WarmSummary {
        let rows = self.store.get_derived_rows().await;
        let listing = self.aggregator.unified_markets().await;
        WarmSummary {
            businesses: rows.len(),
            markets: listing.markets.len(),
            external_available: listing.external_available,
            degraded: self.store.is_degraded(),
        }
    }

    /// Run until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let core = &self.config.core;
        info!(
            program_id = %core.program_id,
            backend = self.store.backend_name(),
            "Starting indexer"
        );

        let subscription = LogSubscription::new(&core.ws_url, core.program_id)
            .with_config(ReconnectConfig::from_env());
        let (events, guard) = subscription.into_event_stream();

        let ingestor = Arc::new(
            EventIngestor::new(self.store.clone()).with_retry(RetryPolicy::from_env()),
        );
        let ingest = ingestor.spawn(events);

        let mut ticker = tokio::time::interval(self.config.warm_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Warm loop started (interval: {:?})", self.config.warm_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let summary = self.warm().await;
                    info!(
                        businesses = summary.businesses,
                        markets = summary.markets,
                        external = summary.external_available,
                        degraded = summary.degraded,
                        "Read model warmed"
                    );
                }
            }
            if ingest.is_finished() {
                warn!("Event ingestor stopped unexpectedly");
                break;
            }
        }

        info!("Shutting down indexer");
        let stats = ingest.shutdown().await;
        guard.unsubscribe().await;
        info!(
            launches = stats.launches,
            price_updates = stats.price_updates,
            failures = stats.failures,
            "Indexer stopped"
        );
        Ok(())
    }
}
