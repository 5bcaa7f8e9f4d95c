//! Shared fixtures for the integration tests: an in-process ledger and
//! helpers that lay out curve, config and market accounts on it.

#![allow(dead_code)]

use async_trait::async_trait;
use marscorp_core::config::{CoreConfig, DEFAULT_SEED_WALLET};
use marscorp_core::db::MemoryBackend;
use marscorp_core::ledger::{
    BondingCurveAccount, LedgerError, LedgerReader, LedgerSector, LedgerWriter, MarketAccount,
    ProtocolConfigAccount,
};
use marscorp_core::store::{ManualClock, ReadModelConfig};
use marscorp_core::{AddressDeriver, LedgerPoller, MarketId, ReadModelStore};
use parking_lot::{Mutex, RwLock};
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Signature, Signer};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Ledger kept in a map. Counts every fetch and records every submission.
#[derive(Default)]
pub struct MockLedger {
    accounts: RwLock<HashMap<Pubkey, Vec<u8>>>,
    unreachable: AtomicBool,
    reject_with: Mutex<Option<String>>,
    fetches: AtomicUsize,
    submissions: Mutex<Vec<Vec<Instruction>>>,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, address: Pubkey, data: Vec<u8>) {
        self.accounts.write().insert(address, data);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Reject every following submission with `message`
    pub fn reject_with(&self, message: &str) {
        *self.reject_with.lock() = Some(message.to_string());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<Vec<Instruction>> {
        self.submissions.lock().clone()
    }
}

#[async_trait]
impl LedgerReader for MockLedger {
    async fn fetch_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Rpc("connection refused".to_string()));
        }
        Ok(self.accounts.read().get(address).cloned())
    }
}

#[async_trait]
impl LedgerWriter for MockLedger {
    async fn submit(
        &self,
        instructions: &[Instruction],
        _signer: &(dyn Signer + Send + Sync),
    ) -> Result<Signature, LedgerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Rpc("confirmation timed out".to_string()));
        }
        if let Some(message) = self.reject_with.lock().clone() {
            return Err(LedgerError::Rejected {
                message,
                logs: vec!["Program log: AnchorError".to_string()],
            });
        }
        self.submissions.lock().push(instructions.to_vec());
        Ok(Signature::new_unique())
    }
}

pub fn program_id() -> Pubkey {
    CoreConfig::default().program_id
}

pub fn seed_wallet() -> Pubkey {
    Pubkey::from_str(DEFAULT_SEED_WALLET).expect("seed wallet should parse")
}

pub fn deriver() -> AddressDeriver {
    AddressDeriver::new(program_id())
}

/// Curve as a fresh launch leaves it, with the given virtual reserves
pub fn curve_account(mint: Pubkey, virtual_sol: u128, virtual_tokens: u128) -> BondingCurveAccount {
    BondingCurveAccount {
        creator: seed_wallet(),
        mint,
        sector: LedgerSector::Terraforming,
        virtual_sol_reserve: virtual_sol,
        virtual_token_reserve: virtual_tokens,
        real_sol_reserve: 0,
        graduated: false,
        bump: 255,
        takeover_active: false,
        takeover_initiator: Pubkey::default(),
        sabotage_penalty_bps: 0,
        sabotage_end_ts: 0,
    }
}

/// Put a curve for a seed-wallet business on the ledger; returns its mint
pub fn put_business_curve(ledger: &MockLedger, ticker: &str, virtual_sol: u128, virtual_tokens: u128) -> Pubkey {
    let addresses = deriver()
        .business(&seed_wallet(), ticker)
        .expect("business addresses should derive");
    let curve = curve_account(addresses.mint, virtual_sol, virtual_tokens);
    ledger.put(addresses.curve, curve.encode());
    addresses.mint
}

pub fn put_protocol_config(ledger: &MockLedger, admin: Pubkey) -> ProtocolConfigAccount {
    let config = ProtocolConfigAccount {
        admin,
        platform_fee_bps: 100,
        yield_fee_bps: 50,
        yield_distributor: admin,
    };
    let address = deriver().config().expect("config address should derive").address;
    ledger.put(address, config.encode());
    config
}

pub fn put_market(ledger: &MockLedger, id: u64, title: &str, oracle: Pubkey, resolved: bool) {
    let market = MarketAccount {
        id,
        title: title.to_string(),
        end_timestamp: 1_900_000_000,
        resolved,
        result: if resolved { Some(true) } else { None },
        total_pool: 4_000_000_000,
        yes_pool: 3_000_000_000,
        no_pool: 1_000_000_000,
        oracle,
    };
    let address = deriver()
        .market(&MarketId::Numeric(id))
        .expect("market address should derive")
        .address;
    ledger.put(address, market.encode());
}

pub fn read_model_config(native_market_ids: Vec<MarketId>) -> ReadModelConfig {
    ReadModelConfig {
        cache_ttl: Duration::from_secs(5),
        max_stale: Duration::from_secs(30),
        speculative_ttl: Duration::from_secs(120),
        native_market_ids,
    }
}

pub struct Harness {
    pub ledger: Arc<MockLedger>,
    pub backend: Arc<MemoryBackend>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<ReadModelStore>,
}

pub fn harness_with_markets(native_market_ids: Vec<MarketId>) -> Harness {
    let ledger = MockLedger::new();
    let backend = Arc::new(MemoryBackend::new());
    let clock = Arc::new(ManualClock::default());
    let poller = LedgerPoller::new(
        ledger.clone(),
        deriver(),
        seed_wallet(),
        Duration::from_secs(1),
    );
    let store = Arc::new(ReadModelStore::with_clock(
        backend.clone(),
        poller,
        read_model_config(native_market_ids),
        clock.clone(),
    ));
    Harness {
        ledger,
        backend,
        clock,
        store,
    }
}

pub fn harness() -> Harness {
    harness_with_markets(Vec::new())
}

pub fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() <= expected.abs() * 1e-9
}
