//! Durable storage for the read model.
//!
//! This module provides:
//! - The `ReadModelBackend` seam the store and ingestor write through
//! - A PostgreSQL backend with standardized pool configuration
//! - An in-memory backend for local runs and tests
//! - Retry with exponential backoff for transient failures

pub mod memory;
pub mod pool;
pub mod postgres;
pub mod retry;

pub use memory::MemoryBackend;
pub use pool::{create_pool, DbPoolConfig};
pub use postgres::PgBackend;
pub use retry::{execute_with_retry, RetryPolicy};

use crate::models::{BusinessMetadata, LatestPrice, PriceHistoryEntry, TokenRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend could not be reached at all
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("row decode failed: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Unavailable(_) => true,
            BackendError::Query(message) => is_transient_message(message),
            BackendError::Decode(_) => false,
        }
    }
}

fn is_transient_message(message: &str) -> bool {
    let err_str = message.to_lowercase();

    err_str.contains("connection")
        || err_str.contains("timeout")
        || err_str.contains("timed out")
        || err_str.contains("broken pipe")
        // PostgreSQL specific transient errors
        || err_str.contains("could not serialize")
        || err_str.contains("deadlock detected")
        || err_str.contains("too many clients")
        || err_str.contains("server closed the connection")
}

impl From<sqlx::Error> for BackendError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => BackendError::Unavailable(e.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => BackendError::Decode(e.to_string()),
            other => BackendError::Query(other.to_string()),
        }
    }
}

/// Durable tables behind the read model: companies, tokens, prices and
/// price history. Inserts are idempotent; the boolean results report
/// whether a new row was written.
#[async_trait]
pub trait ReadModelBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create tables if they do not exist
    async fn ensure_schema(&self) -> Result<(), BackendError>;

    async fn load_companies(&self) -> Result<Vec<BusinessMetadata>, BackendError>;

    /// Insert-or-ignore keyed by ticker
    async fn insert_company(&self, company: &BusinessMetadata) -> Result<bool, BackendError>;

    /// Insert-or-ignore keyed by ticker
    async fn insert_token(&self, token: &TokenRecord) -> Result<bool, BackendError>;

    async fn token_by_mint(&self, mint_address: &str) -> Result<Option<TokenRecord>, BackendError>;

    async fn tokens(&self) -> Result<Vec<TokenRecord>, BackendError>;

    /// Set the latest price unless a newer one is already recorded
    async fn upsert_latest_price(
        &self,
        ticker: &str,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<(), BackendError>;

    async fn latest_price(&self, ticker: &str) -> Result<Option<LatestPrice>, BackendError>;

    /// Append unless `(ticker, timestamp)` already exists
    async fn append_price_history(&self, entry: &PriceHistoryEntry) -> Result<bool, BackendError>;

    /// History for `ticker`, oldest first
    async fn price_history(&self, ticker: &str) -> Result<Vec<PriceHistoryEntry>, BackendError>;
}
