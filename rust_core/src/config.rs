//! Shared configuration for ledger access and the read model.
//!
//! Every value has a default so the core can be exercised without an
//! environment; services override through env vars.

use crate::derivation::MarketId;
use solana_sdk::pubkey::Pubkey;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Deployed exchange program.
pub const DEFAULT_PROGRAM_ID: &str = "5GKfHwujgiKLXP84f28HyGL5FJ3AnunKsVGmKDmG6RXi";

/// Wallet that launched the bootstrap businesses.
pub const DEFAULT_SEED_WALLET: &str = "9BeBqNy15zt5mq112RrR35GaHNoqkPNFe1brhtEocdpU";

pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";
pub const DEFAULT_WS_URL: &str = "wss://api.devnet.solana.com";

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub program_id: Pubkey,
    /// Creator seed used when polling businesses
    pub seed_wallet: Pubkey,
    pub rpc_url: String,
    pub ws_url: String,
    /// Freshness window for derived rows and native markets
    pub cache_ttl: Duration,
    /// Oldest cached snapshot that may be served while the ledger is unreachable
    pub max_stale: Duration,
    /// Deadline for a single account fetch during a poll
    pub fetch_timeout: Duration,
    /// How long an unconfirmed launch stays visible
    pub speculative_ttl: Duration,
    pub compute_unit_limit: u32,
    pub native_market_ids: Vec<MarketId>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            program_id: Pubkey::from_str(DEFAULT_PROGRAM_ID).unwrap_or_default(),
            seed_wallet: Pubkey::from_str(DEFAULT_SEED_WALLET).unwrap_or_default(),
            rpc_url: DEFAULT_RPC_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            cache_ttl: Duration::from_millis(5_000),
            max_stale: Duration::from_millis(30_000),
            fetch_timeout: Duration::from_millis(3_000),
            speculative_ttl: Duration::from_secs(120),
            compute_unit_limit: 1_000_000,
            native_market_ids: Vec::new(),
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            program_id: env::var("PROGRAM_ID")
                .ok()
                .and_then(|v| Pubkey::from_str(v.trim()).ok())
                .unwrap_or(defaults.program_id),
            seed_wallet: env::var("SEED_WALLET_PUBKEY")
                .ok()
                .and_then(|v| Pubkey::from_str(v.trim()).ok())
                .unwrap_or(defaults.seed_wallet),
            rpc_url: env::var("RPC_URL").unwrap_or(defaults.rpc_url),
            ws_url: env::var("WS_URL").unwrap_or(defaults.ws_url),
            cache_ttl: env_millis("READ_MODEL_CACHE_TTL_MS").unwrap_or(defaults.cache_ttl),
            max_stale: env_millis("READ_MODEL_MAX_STALE_MS").unwrap_or(defaults.max_stale),
            fetch_timeout: env_millis("POLL_FETCH_TIMEOUT_MS").unwrap_or(defaults.fetch_timeout),
            speculative_ttl: env_millis("READ_MODEL_SPECULATIVE_TTL_MS")
                .unwrap_or(defaults.speculative_ttl),
            compute_unit_limit: env::var("COMPUTE_UNIT_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.compute_unit_limit),
            native_market_ids: env::var("NATIVE_MARKET_IDS")
                .map(|v| parse_market_ids(&v))
                .unwrap_or(defaults.native_market_ids),
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Comma separated list, blanks ignored.
pub fn parse_market_ids(raw: &str) -> Vec<MarketId> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(MarketId::parse)
        .collect()
}
