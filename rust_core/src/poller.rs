//! Pull path: reads every known business's bonding curve from the ledger.
//!
//! Fetches are issued concurrently and each one is isolated: a missing,
//! malformed or slow account only removes that business from the result.
//! There are no retries inside a poll; the next cache expiry is the retry.

use crate::derivation::{AddressDeriver, BusinessAddresses, MarketId};
use crate::ledger::{BondingCurveAccount, LedgerReader, MarketAccount};
use crate::models::{
    BusinessMetadata, DerivedBusinessRow, MarketCategory, PredictionMarket, RowStatus, Takeover,
    DEFAULT_TOTAL_SUPPLY,
};
use crate::pricing;
use chrono::{TimeZone, Utc};
use futures_util::future::join_all;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Outcome counts of one poll cycle
#[derive(Debug, Default, Clone)]
pub struct PollReport {
    pub rows: Vec<DerivedBusinessRow>,
    /// No curve account exists yet
    pub missing: usize,
    pub undecodable: usize,
    pub zero_reserve: usize,
    /// Fetch returned an error
    pub failed: usize,
    pub timed_out: usize,
}

impl PollReport {
    /// Nothing came back and at least one fetch could not reach the ledger
    pub fn ledger_unreachable(&self) -> bool {
        self.rows.is_empty() && (self.failed + self.timed_out) > 0
    }

    pub fn dropped(&self) -> usize {
        self.missing + self.undecodable + self.zero_reserve + self.failed + self.timed_out
    }
}

enum FetchOutcome {
    Row(Box<DerivedBusinessRow>),
    Missing,
    Undecodable,
    ZeroReserve,
    Failed,
    TimedOut,
}

/// Build the visible row for a decoded curve. `None` when the price is undefined.
pub fn derive_row(
    metadata: &BusinessMetadata,
    addresses: &BusinessAddresses,
    curve: &BondingCurveAccount,
    total_supply: u64,
) -> Option<DerivedBusinessRow> {
    let price = pricing::scaled_price(curve.virtual_sol_reserve, curve.virtual_token_reserve)?;

    Some(DerivedBusinessRow {
        id: addresses.curve.to_string(),
        mint_address: addresses.mint.to_string(),
        metadata: metadata.clone(),
        price,
        market_cap: pricing::market_cap(price, total_supply),
        volume: pricing::volume(curve.real_sol_reserve),
        apy: pricing::heuristic_apy(curve.real_sol_reserve),
        takeover: Takeover {
            active: curve.takeover_active,
            // The curve does not record stake progress
            progress: 0.0,
        },
        status: RowStatus::Confirmed,
    })
}

/// Present a decoded market account as a listing row
pub fn native_market(account: &MarketAccount) -> PredictionMarket {
    let prob_yes = if account.total_pool > 0 {
        account.yes_pool as f64 / account.total_pool as f64
    } else {
        0.5
    };
    let pool_sol = pricing::real_sol(account.total_pool);

    PredictionMarket {
        id: account.id.to_string(),
        question: account.title.clone(),
        category: MarketCategory::Corporate,
        volume: pool_sol,
        liquidity: pool_sol,
        prob_yes,
        ends_at: Utc.timestamp_opt(account.end_timestamp, 0).single(),
        description: Some(match account.result {
            Some(true) => "Resolved YES".to_string(),
            Some(false) => "Resolved NO".to_string(),
            None => format!("Native MarsCorp market #{}", account.id),
        }),
        oracle: Some(account.oracle.to_string()),
        resolved: account.resolved,
    }
}

pub struct LedgerPoller {
    ledger: Arc<dyn LedgerReader>,
    deriver: AddressDeriver,
    seed_wallet: Pubkey,
    fetch_timeout: Duration,
}

impl LedgerPoller {
    pub fn new(
        ledger: Arc<dyn LedgerReader>,
        deriver: AddressDeriver,
        seed_wallet: Pubkey,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            deriver,
            seed_wallet,
            fetch_timeout,
        }
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    pub fn seed_wallet(&self) -> &Pubkey {
        &self.seed_wallet
    }

    /// Poll every business in `metadata`. `supplies` maps ticker to total
    /// supply; absent tickers use the launch default.
    pub async fn poll(
        &self,
        metadata: &[BusinessMetadata],
        supplies: &HashMap<String, u64>,
    ) -> PollReport {
        let fetches = metadata.iter().map(|meta| {
            let supply = supplies
                .get(&meta.ticker)
                .copied()
                .unwrap_or(DEFAULT_TOTAL_SUPPLY);
            self.fetch_business(meta, supply)
        });
        let outcomes = join_all(fetches).await;

        let mut report = PollReport::default();
        for outcome in outcomes {
            match outcome {
                FetchOutcome::Row(row) => report.rows.push(*row),
                FetchOutcome::Missing => report.missing += 1,
                FetchOutcome::Undecodable => report.undecodable += 1,
                FetchOutcome::ZeroReserve => report.zero_reserve += 1,
                FetchOutcome::Failed => report.failed += 1,
                FetchOutcome::TimedOut => report.timed_out += 1,
            }
        }

        info!(
            rows = report.rows.len(),
            missing = report.missing,
            undecodable = report.undecodable,
            zero_reserve = report.zero_reserve,
            failed = report.failed,
            timed_out = report.timed_out,
            "Ledger poll complete"
        );
        report
    }

    async fn fetch_business(&self, meta: &BusinessMetadata, total_supply: u64) -> FetchOutcome {
        let addresses = match self.deriver.business(&self.seed_wallet, &meta.ticker) {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!(ticker = %meta.ticker, "Cannot derive addresses: {}", e);
                return FetchOutcome::Undecodable;
            }
        };

        let data = match timeout(
            self.fetch_timeout,
            self.ledger.fetch_account_data(&addresses.curve),
        )
        .await
        {
            Err(_) => {
                warn!(ticker = %meta.ticker, "Curve fetch timed out after {:?}", self.fetch_timeout);
                return FetchOutcome::TimedOut;
            }
            Ok(Err(e)) => {
                warn!(ticker = %meta.ticker, "Curve fetch failed: {}", e);
                return FetchOutcome::Failed;
            }
            Ok(Ok(None)) => {
                debug!(ticker = %meta.ticker, curve = %addresses.curve, "No curve account yet");
                return FetchOutcome::Missing;
            }
            Ok(Ok(Some(data))) => data,
        };

        let curve = match BondingCurveAccount::decode(&data) {
            Ok(curve) => curve,
            Err(e) => {
                warn!(ticker = %meta.ticker, "Curve account undecodable: {}", e);
                return FetchOutcome::Undecodable;
            }
        };

        match derive_row(meta, &addresses, &curve, total_supply) {
            Some(row) => FetchOutcome::Row(Box::new(row)),
            None => {
                debug!(ticker = %meta.ticker, "Zero token reserve, row dropped");
                FetchOutcome::ZeroReserve
            }
        }
    }

    /// Decode native prediction markets; unavailable ones are omitted
    pub async fn poll_markets(&self, ids: &[MarketId]) -> Vec<PredictionMarket> {
        let fetches = ids.iter().map(|id| async move {
            let address = match self.deriver.market(id) {
                Ok(derived) => derived.address,
                Err(e) => {
                    warn!(market = %id, "Cannot derive market address: {}", e);
                    return None;
                }
            };
            match timeout(self.fetch_timeout, self.ledger.fetch_account_data(&address)).await {
                Ok(Ok(Some(data))) => match MarketAccount::decode(&data) {
                    Ok(account) => Some(native_market(&account)),
                    Err(e) => {
                        warn!(market = %id, "Market account undecodable: {}", e);
                        None
                    }
                },
                Ok(Ok(None)) => {
                    debug!(market = %id, "Market account not found");
                    None
                }
                Ok(Err(e)) => {
                    warn!(market = %id, "Market fetch failed: {}", e);
                    None
                }
                Err(_) => {
                    warn!(market = %id, "Market fetch timed out");
                    None
                }
            }
        });

        join_all(fetches).await.into_iter().flatten().collect()
    }
}
