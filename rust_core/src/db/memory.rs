//! In-memory read-model backend.
//!
//! Mirrors the PostgreSQL backend's idempotency rules. Availability can be
//! toggled to exercise degraded-mode behaviour.

use super::{BackendError, ReadModelBackend};
use crate::models::{BusinessMetadata, LatestPrice, PriceHistoryEntry, TokenRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Default)]
struct Tables {
    companies: Vec<BusinessMetadata>,
    tokens: HashMap<String, TokenRecord>,
    prices: HashMap<String, LatestPrice>,
    history: BTreeMap<(String, DateTime<Utc>), f64>,
}

pub struct MemoryBackend {
    tables: RwLock<Tables>,
    available: AtomicBool,
    operations: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
            operations: AtomicU64::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of calls made against the backend, including failed ones
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), BackendError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("memory backend offline".to_string()))
        }
    }
}

#[async_trait]
impl ReadModelBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_schema(&self) -> Result<(), BackendError> {
        self.check()
    }

    async fn load_companies(&self) -> Result<Vec<BusinessMetadata>, BackendError> {
        self.check()?;
        Ok(self.tables.read().companies.clone())
    }

    async fn insert_company(&self, company: &BusinessMetadata) -> Result<bool, BackendError> {
        self.check()?;
        let mut tables = self.tables.write();
        if tables.companies.iter().any(|c| c.ticker == company.ticker) {
            return Ok(false);
        }
        tables.companies.push(company.clone());
        Ok(true)
    }

    async fn insert_token(&self, token: &TokenRecord) -> Result<bool, BackendError> {
        self.check()?;
        let mut tables = self.tables.write();
        let clash = tables.tokens.contains_key(&token.ticker)
            || tables
                .tokens
                .values()
                .any(|t| t.mint_address == token.mint_address);
        if clash {
            return Ok(false);
        }
        tables.tokens.insert(token.ticker.clone(), token.clone());
        Ok(true)
    }

    async fn token_by_mint(&self, mint_address: &str) -> Result<Option<TokenRecord>, BackendError> {
        self.check()?;
        Ok(self
            .tables
            .read()
            .tokens
            .values()
            .find(|t| t.mint_address == mint_address)
            .cloned())
    }

    async fn tokens(&self) -> Result<Vec<TokenRecord>, BackendError> {
        self.check()?;
        Ok(self.tables.read().tokens.values().cloned().collect())
    }

    async fn upsert_latest_price(
        &self,
        ticker: &str,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        self.check()?;
        let mut tables = self.tables.write();
        let newer_exists = tables
            .prices
            .get(ticker)
            .map(|p| p.updated_at > at)
            .unwrap_or(false);
        if !newer_exists {
            tables.prices.insert(
                ticker.to_string(),
                LatestPrice {
                    ticker: ticker.to_string(),
                    price,
                    updated_at: at,
                },
            );
        }
        Ok(())
    }

    async fn latest_price(&self, ticker: &str) -> Result<Option<LatestPrice>, BackendError> {
        self.check()?;
        Ok(self.tables.read().prices.get(ticker).cloned())
    }

    async fn append_price_history(&self, entry: &PriceHistoryEntry) -> Result<bool, BackendError> {
        self.check()?;
        let mut tables = self.tables.write();
        let key = (entry.ticker.clone(), entry.timestamp);
        if tables.history.contains_key(&key) {
            return Ok(false);
        }
        tables.history.insert(key, entry.price);
        Ok(true)
    }

    async fn price_history(&self, ticker: &str) -> Result<Vec<PriceHistoryEntry>, BackendError> {
        self.check()?;
        Ok(self
            .tables
            .read()
            .history
            .iter()
            .filter(|((t, _), _)| t == ticker)
            .map(|((t, ts), price)| PriceHistoryEntry {
                ticker: t.clone(),
                price: *price,
                timestamp: *ts,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sector;

    #[tokio::test]
    async fn test_company_insert_is_idempotent() {
        let backend = MemoryBackend::new();
        let meta = BusinessMetadata::new("DUST", "Red Dust Mining", Sector::Mining, "", "Tharsis Rise");
        assert!(backend.insert_company(&meta).await.unwrap());
        assert!(!backend.insert_company(&meta).await.unwrap());
        assert_eq!(backend.load_companies().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_backend_fails_every_call() {
        let backend = MemoryBackend::new();
        backend.set_available(false);
        assert!(matches!(
            backend.load_companies().await,
            Err(BackendError::Unavailable(_))
        ));
        backend.set_available(true);
        assert!(backend.load_companies().await.is_ok());
        assert_eq!(backend.operation_count(), 2);
    }

    #[tokio::test]
    async fn test_history_ordered_and_unique() {
        let backend = MemoryBackend::new();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);
        for (ts, price) in [(t1, 2.0), (t0, 1.0), (t1, 9.0)] {
            backend
                .append_price_history(&PriceHistoryEntry {
                    ticker: "ICE".to_string(),
                    price,
                    timestamp: ts,
                })
                .await
                .unwrap();
        }
        let history = backend.price_history("ICE").await.unwrap();
        let prices: Vec<f64> = history.iter().map(|h| h.price).collect();
        assert_eq!(prices, vec![1.0, 2.0]);
    }
}
