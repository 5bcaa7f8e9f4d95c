//! Read model: durable metadata plus a time-boxed cache of derived rows.
//!
//! Writers (the poller through refreshes, the ingestor through the record
//! operations) go through this store; it owns the only shared cache.
//!
//! Backend failures never reach callers of the read operations. The store
//! switches to the in-memory list, logs once with `mode = "degraded"`, and
//! logs again when the backend recovers.

pub mod bootstrap;
pub mod cache;

pub use bootstrap::genesis_businesses;
pub use cache::{Clock, ManualClock, SystemClock, TtlCache};

use crate::config::CoreConfig;
use crate::db::{BackendError, ReadModelBackend};
use crate::derivation::MarketId;
use crate::models::{
    BusinessMetadata, DerivedBusinessRow, LatestPrice, PredictionMarket, PriceHistoryEntry,
    RowStatus, TokenRecord,
};
use crate::poller::LedgerPoller;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ReadModelConfig {
    pub cache_ttl: Duration,
    /// Oldest snapshot served while the ledger is unreachable
    pub max_stale: Duration,
    pub speculative_ttl: Duration,
    pub native_market_ids: Vec<MarketId>,
}

impl Default for ReadModelConfig {
    fn default() -> Self {
        Self::from(&CoreConfig::default())
    }
}

impl From<&CoreConfig> for ReadModelConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            cache_ttl: config.cache_ttl,
            max_stale: config.max_stale,
            speculative_ttl: config.speculative_ttl,
            native_market_ids: config.native_market_ids.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    AlreadyPresent,
    /// Backend unreachable; kept in the process-local list only
    MemoryOnly,
}

struct SpeculativeRow {
    row: DerivedBusinessRow,
    added_at: DateTime<Utc>,
}

pub struct ReadModelStore {
    backend: Arc<dyn ReadModelBackend>,
    poller: LedgerPoller,
    config: ReadModelConfig,
    clock: Arc<dyn Clock>,
    rows: TtlCache<Vec<DerivedBusinessRow>>,
    markets: TtlCache<Vec<PredictionMarket>>,
    refresh_lock: tokio::sync::Mutex<()>,
    market_refresh_lock: tokio::sync::Mutex<()>,
    /// Bootstrap list plus businesses added during this process, newest first
    in_memory: RwLock<Vec<BusinessMetadata>>,
    speculative: RwLock<HashMap<String, SpeculativeRow>>,
    tracked_markets: RwLock<Vec<MarketId>>,
    schema_ready: AtomicBool,
    degraded: AtomicBool,
}

impl ReadModelStore {
    pub fn new(
        backend: Arc<dyn ReadModelBackend>,
        poller: LedgerPoller,
        config: ReadModelConfig,
    ) -> Self {
        Self::with_clock(backend, poller, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: Arc<dyn ReadModelBackend>,
        poller: LedgerPoller,
        config: ReadModelConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rows: TtlCache::new(config.cache_ttl, clock.clone()),
            markets: TtlCache::new(config.cache_ttl, clock.clone()),
            tracked_markets: RwLock::new(config.native_market_ids.clone()),
            backend,
            poller,
            config,
            clock,
            refresh_lock: tokio::sync::Mutex::new(()),
            market_refresh_lock: tokio::sync::Mutex::new(()),
            in_memory: RwLock::new(genesis_businesses()),
            speculative: RwLock::new(HashMap::new()),
            schema_ready: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn mark_degraded(&self, operation: &str, error: &BackendError) {
        // Force schema creation again once the backend is back
        self.schema_ready.store(false, Ordering::SeqCst);
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(
                mode = "degraded",
                backend = self.backend.name(),
                operation,
                "Read-model backend unavailable, serving in-memory metadata: {}",
                error
            );
        } else {
            debug!(mode = "degraded", operation, "Backend still unavailable: {}", error);
        }
    }

    fn mark_healthy(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!(
                mode = "healthy",
                backend = self.backend.name(),
                "Read-model backend recovered"
            );
        }
    }

    fn track<T>(&self, operation: &str, result: Result<T, BackendError>) -> Result<T, BackendError> {
        match &result {
            Ok(_) => self.mark_healthy(),
            Err(e) => self.mark_degraded(operation, e),
        }
        result
    }

    async fn ensure_schema(&self) -> Result<(), BackendError> {
        if self.schema_ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.ensure_schema().await?;
        self.schema_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn load_durable_metadata(&self) -> Result<Vec<BusinessMetadata>, BackendError> {
        self.ensure_schema().await?;
        let companies = self.backend.load_companies().await?;
        if !companies.is_empty() {
            return Ok(companies);
        }

        let genesis = genesis_businesses();
        info!(count = genesis.len(), "Seeding empty companies table");
        for company in &genesis {
            self.backend.insert_company(company).await?;
        }
        Ok(genesis)
    }

    /// Durable metadata, or the in-memory list while the backend is down
    pub async fn get_metadata(&self) -> Vec<BusinessMetadata> {
        let result = self.load_durable_metadata().await;
        match self.track("get_metadata", result) {
            Ok(metadata) => metadata,
            Err(_) => self.in_memory.read().clone(),
        }
    }

    /// Insert-or-ignore on ticker; always invalidates the row cache
    pub async fn upsert_metadata(&self, entry: BusinessMetadata) -> UpsertOutcome {
        {
            let mut list = self.in_memory.write();
            if !list.iter().any(|m| m.ticker == entry.ticker) {
                list.insert(0, entry.clone());
            }
        }

        let result = match self.ensure_schema().await {
            Ok(()) => self.backend.insert_company(&entry).await,
            Err(e) => Err(e),
        };
        let outcome = match self.track("upsert_metadata", result) {
            Ok(true) => UpsertOutcome::Inserted,
            Ok(false) => {
                debug!(ticker = %entry.ticker, "Metadata already present");
                UpsertOutcome::AlreadyPresent
            }
            Err(_) => UpsertOutcome::MemoryOnly,
        };

        self.rows.invalidate();
        outcome
    }

    pub fn invalidate(&self) {
        self.rows.invalidate();
    }

    async fn token_supplies(&self) -> HashMap<String, u64> {
        let result = self.backend.tokens().await;
        match self.track("tokens", result) {
            Ok(tokens) => tokens
                .into_iter()
                .map(|t| (t.ticker, t.total_supply))
                .collect(),
            Err(_) => HashMap::new(),
        }
    }

    /// Cached rows if fresh, otherwise one coalesced poll of the ledger
    pub async fn get_derived_rows(&self) -> Vec<DerivedBusinessRow> {
        if let Some(rows) = self.rows.fresh() {
            return self.with_speculative(rows);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited
        if let Some(rows) = self.rows.fresh() {
            return self.with_speculative(rows);
        }

        let generation = self.rows.generation();
        let metadata = self.get_metadata().await;
        let supplies = self.token_supplies().await;
        let report = self.poller.poll(&metadata, &supplies).await;

        let rows = if report.ledger_unreachable() {
            match self.rows.within(self.config.max_stale) {
                Some(stale) => {
                    warn!(
                        mode = "stale",
                        age_ms = self.rows.age().map(|a| a.as_millis() as u64).unwrap_or(0),
                        "Ledger unreachable, serving last snapshot"
                    );
                    return self.with_speculative(stale);
                }
                None => {
                    warn!(mode = "degraded", "Ledger unreachable and no recent snapshot");
                    report.rows
                }
            }
        } else {
            report.rows
        };

        if !self.rows.store_if_current(rows.clone(), generation) {
            debug!("Cache invalidated during refresh, result not cached");
        }
        self.with_speculative(rows)
    }

    /// Show an unconfirmed launch until the ledger confirms it or it expires
    pub fn add_speculative(&self, mut row: DerivedBusinessRow) {
        row.status = RowStatus::Speculative;
        debug!(ticker = %row.metadata.ticker, "Speculative row added");
        self.speculative.write().insert(
            row.metadata.ticker.clone(),
            SpeculativeRow {
                row,
                added_at: self.clock.now(),
            },
        );
    }

    /// Drop the speculative row for `ticker`; true if one existed
    pub fn reconcile_speculative(&self, ticker: &str) -> bool {
        let removed = self.speculative.write().remove(ticker).is_some();
        if removed {
            debug!(ticker, "Speculative row reconciled");
        }
        removed
    }

    fn with_speculative(&self, mut confirmed: Vec<DerivedBusinessRow>) -> Vec<DerivedBusinessRow> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.config.speculative_ttl)
            .unwrap_or_else(|_| chrono::Duration::zero());

        let mut speculative = self.speculative.write();
        speculative.retain(|ticker, entry| {
            let alive = now - entry.added_at < ttl;
            if !alive {
                debug!(ticker = %ticker, "Speculative row expired");
            }
            alive
        });

        let known: HashSet<String> = confirmed.iter().map(|r| r.metadata.ticker.clone()).collect();
        let mut pending: Vec<_> = speculative
            .values()
            .filter(|entry| !known.contains(&entry.row.metadata.ticker))
            .collect();
        pending.sort_by_key(|entry| entry.added_at);
        confirmed.extend(pending.into_iter().map(|entry| entry.row.clone()));
        confirmed
    }

    /// Start listing an additional native market
    pub fn track_market(&self, id: MarketId) {
        let mut tracked = self.tracked_markets.write();
        if !tracked.contains(&id) {
            tracked.push(id);
            self.markets.invalidate();
        }
    }

    pub async fn get_native_markets(&self) -> Vec<PredictionMarket> {
        if let Some(markets) = self.markets.fresh() {
            return markets;
        }

        let _guard = self.market_refresh_lock.lock().await;
        if let Some(markets) = self.markets.fresh() {
            return markets;
        }

        let generation = self.markets.generation();
        let ids = self.tracked_markets.read().clone();
        let markets = self.poller.poll_markets(&ids).await;
        self.markets.store_if_current(markets.clone(), generation);
        markets
    }

    // ------------------------------------------------------------------
    // Write-through operations used by the ingestor. These surface backend
    // errors so the caller can retry.
    // ------------------------------------------------------------------

    pub async fn record_token(&self, token: &TokenRecord) -> Result<bool, BackendError> {
        let result = match self.ensure_schema().await {
            Ok(()) => self.backend.insert_token(token).await,
            Err(e) => Err(e),
        };
        self.track("record_token", result)
    }

    pub async fn ticker_for_mint(&self, mint_address: &str) -> Result<Option<String>, BackendError> {
        let result = self.backend.token_by_mint(mint_address).await;
        self.track("ticker_for_mint", result)
            .map(|token| token.map(|t| t.ticker))
    }

    /// Update the latest price and append to history. Returns whether a
    /// new history row was written.
    pub async fn record_price(
        &self,
        ticker: &str,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<bool, BackendError> {
        let result = async {
            self.ensure_schema().await?;
            self.backend.upsert_latest_price(ticker, price, at).await?;
            self.backend
                .append_price_history(&PriceHistoryEntry {
                    ticker: ticker.to_string(),
                    price,
                    timestamp: at,
                })
                .await
        }
        .await;
        self.track("record_price", result)
    }

    pub async fn latest_price(&self, ticker: &str) -> Result<Option<LatestPrice>, BackendError> {
        let result = self.backend.latest_price(ticker).await;
        self.track("latest_price", result)
    }

    pub async fn price_history(&self, ticker: &str) -> Result<Vec<PriceHistoryEntry>, BackendError> {
        let result = self.backend.price_history(ticker).await;
        self.track("price_history", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryBackend;
    use crate::derivation::AddressDeriver;
    use crate::ledger::{LedgerError, LedgerReader};
    use crate::models::{Sector, Takeover};
    use async_trait::async_trait;
    use solana_sdk::pubkey::Pubkey;

    struct EmptyLedger;

    #[async_trait]
    impl LedgerReader for EmptyLedger {
        async fn fetch_account_data(&self, _: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
            Ok(None)
        }
    }

    fn store(backend: Arc<MemoryBackend>, clock: Arc<ManualClock>) -> ReadModelStore {
        let poller = LedgerPoller::new(
            Arc::new(EmptyLedger),
            AddressDeriver::new(Pubkey::new_unique()),
            Pubkey::new_unique(),
            Duration::from_secs(1),
        );
        ReadModelStore::with_clock(backend, poller, ReadModelConfig::default(), clock)
    }

    fn speculative_row(ticker: &str) -> DerivedBusinessRow {
        DerivedBusinessRow {
            id: "pending".to_string(),
            mint_address: "pending".to_string(),
            metadata: BusinessMetadata::launched(ticker, ticker),
            price: crate::models::INITIAL_PRICE,
            market_cap: 37.5,
            volume: 0.0,
            apy: 2.0,
            takeover: Takeover::default(),
            status: RowStatus::Confirmed,
        }
    }

    #[tokio::test]
    async fn test_empty_backend_is_seeded_once() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store(backend.clone(), Arc::new(ManualClock::default()));

        let first = store.get_metadata().await;
        assert_eq!(first.len(), 20);
        let second = store.get_metadata().await;
        assert_eq!(second, first);
        assert_eq!(backend.load_companies().await.unwrap().len(), 20);
        assert!(!store.is_degraded());
    }

    #[tokio::test]
    async fn test_degraded_mode_and_recovery() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store(backend.clone(), Arc::new(ManualClock::default()));
        backend.set_available(false);

        let added = BusinessMetadata::new("NEW", "Newco", Sector::Energy, "", "Orbit");
        assert_eq!(store.upsert_metadata(added).await, UpsertOutcome::MemoryOnly);

        let fallback = store.get_metadata().await;
        assert!(store.is_degraded());
        assert_eq!(fallback.len(), 21);
        assert_eq!(fallback[0].ticker, "NEW");

        backend.set_available(true);
        let healthy = store.get_metadata().await;
        assert!(!store.is_degraded());
        // The in-memory addition is never written back
        assert!(healthy.iter().all(|m| m.ticker != "NEW"));
    }

    #[tokio::test]
    async fn test_speculative_rows_expire_and_reconcile() {
        let clock = Arc::new(ManualClock::default());
        let store = store(Arc::new(MemoryBackend::new()), clock.clone());

        store.add_speculative(speculative_row("AAA"));
        store.add_speculative(speculative_row("BBB"));
        let rows = store.get_derived_rows().await;
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.is_speculative()));

        assert!(store.reconcile_speculative("AAA"));
        assert!(!store.reconcile_speculative("AAA"));

        clock.advance(Duration::from_secs(121));
        assert!(store.get_derived_rows().await.is_empty());
    }
}
