//! MarsCorp Core - ledger synchronization and transaction building for the MarsCorp exchange.
//!
//! This crate provides:
//! - Deterministic program-derived address derivation for businesses and markets
//! - Ledger account/event decoding and an RPC-backed ledger client
//! - A cached, fault-tolerant read model (durable metadata + live on-ledger state)
//! - Event ingestion keeping durable storage in step with the ledger
//! - Transaction assembly for every user-facing protocol action
//! - Merging of native and external prediction markets

pub mod circuit_breaker;
pub mod clients;
pub mod config;
pub mod db;
pub mod derivation;
pub mod ingestor;
pub mod ledger;
pub mod markets;
pub mod models;
pub mod poller;
pub mod pricing;
pub mod protocol;
pub mod store;

pub use config::CoreConfig;
pub use derivation::{AddressDeriver, BusinessAddresses, DerivationError, DerivedAddress, MarketId};
pub use ingestor::{EventIngestor, IngestorHandle};
pub use markets::{MarketAggregator, MarketFeed, UnifiedMarkets};
pub use poller::{LedgerPoller, PollReport};
pub use protocol::{OperationOutcome, PendingOperation, ProtocolClient, ProtocolError};
pub use store::ReadModelStore;
