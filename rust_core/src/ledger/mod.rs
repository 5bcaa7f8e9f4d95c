//! Ledger access: account reads, transaction submission and event streams.

pub mod codec;
pub mod rpc;
pub mod subscription;

pub use codec::{
    BondingCurveAccount, BusinessLaunched, CodecError, LedgerEvent, LedgerSector, MarketAccount,
    PriceUpdated, ProtocolConfigAccount, SabotageApplied, TakeoverInitiated,
};
pub use rpc::RpcLedger;
pub use subscription::{LedgerEventStream, LogSubscription, ReconnectConfig, ReconnectStats, SubscriptionGuard};

use async_trait::async_trait;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Signature, Signer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger RPC failed: {0}")]
    Rpc(String),

    /// The ledger refused the transaction
    #[error("transaction rejected: {message}")]
    Rejected { message: String, logs: Vec<String> },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("log subscription failed: {0}")]
    Subscription(String),
}

/// Read access to raw account data
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Account bytes, `None` when no account exists at `address`
    async fn fetch_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError>;

    async fn account_exists(&self, address: &Pubkey) -> Result<bool, LedgerError> {
        Ok(self.fetch_account_data(address).await?.is_some())
    }
}

/// Submits signed transactions and waits for confirmation
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    async fn submit(
        &self,
        instructions: &[Instruction],
        signer: &(dyn Signer + Send + Sync),
    ) -> Result<Signature, LedgerError>;
}
