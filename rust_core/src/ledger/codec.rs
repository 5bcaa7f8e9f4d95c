//! Account and event layouts of the exchange program.
//!
//! Accounts carry an 8-byte discriminator `sha256("account:<Name>")[..8]`
//! followed by the borsh-encoded fields. Events are emitted in program logs
//! as `Program data: <base64>` with discriminator `sha256("event:<Name>")[..8]`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;
use tracing::debug;

const PROGRAM_DATA_PREFIX: &str = "Program data: ";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("account data too short ({0} bytes)")]
    TooShort(usize),

    #[error("discriminator does not match {0}")]
    DiscriminatorMismatch(&'static str),

    #[error("borsh decode failed: {0}")]
    Borsh(#[from] std::io::Error),
}

fn sighash(namespace: &str, name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("{}:{}", namespace, name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

pub fn account_discriminator(name: &str) -> [u8; 8] {
    sighash("account", name)
}

pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    sighash("global", name)
}

pub fn event_discriminator(name: &str) -> [u8; 8] {
    sighash("event", name)
}

fn decode_tagged<T: BorshDeserialize>(data: &[u8], name: &'static str) -> Result<T, CodecError> {
    if data.len() < 8 {
        return Err(CodecError::TooShort(data.len()));
    }
    if data[..8] != account_discriminator(name) {
        return Err(CodecError::DiscriminatorMismatch(name));
    }
    // Accounts may be allocated larger than their fields; trailing bytes are ignored.
    let mut body = &data[8..];
    Ok(T::deserialize(&mut body)?)
}

fn encode_tagged<T: BorshSerialize>(tag: [u8; 8], value: &T) -> Vec<u8> {
    let mut out = tag.to_vec();
    // Writing into a Vec cannot fail
    let _ = value.serialize(&mut out);
    out
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum LedgerSector {
    Tech = 0,
    Mining = 1,
    Energy = 2,
    Terraforming = 3,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct BondingCurveLayout {
    creator: [u8; 32],
    mint: [u8; 32],
    sector: LedgerSector,
    virtual_sol: u128,
    virtual_tokens: u128,
    real_sol: u64,
    graduated: bool,
    bump: u8,
    takeover_active: bool,
    takeover_initiator: [u8; 32],
    sabotage_penalty_bps: u16,
    sabotage_end_ts: i64,
}

/// Decoded bonding curve state of one business
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondingCurveAccount {
    pub creator: Pubkey,
    pub mint: Pubkey,
    pub sector: LedgerSector,
    pub virtual_sol_reserve: u128,
    pub virtual_token_reserve: u128,
    pub real_sol_reserve: u64,
    pub graduated: bool,
    pub bump: u8,
    pub takeover_active: bool,
    pub takeover_initiator: Pubkey,
    pub sabotage_penalty_bps: u16,
    pub sabotage_end_ts: i64,
}

impl BondingCurveAccount {
    pub const NAME: &'static str = "BondingCurve";

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let raw: BondingCurveLayout = decode_tagged(data, Self::NAME)?;
        Ok(Self {
            creator: Pubkey::new_from_array(raw.creator),
            mint: Pubkey::new_from_array(raw.mint),
            sector: raw.sector,
            virtual_sol_reserve: raw.virtual_sol,
            virtual_token_reserve: raw.virtual_tokens,
            real_sol_reserve: raw.real_sol,
            graduated: raw.graduated,
            bump: raw.bump,
            takeover_active: raw.takeover_active,
            takeover_initiator: Pubkey::new_from_array(raw.takeover_initiator),
            sabotage_penalty_bps: raw.sabotage_penalty_bps,
            sabotage_end_ts: raw.sabotage_end_ts,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let raw = BondingCurveLayout {
            creator: self.creator.to_bytes(),
            mint: self.mint.to_bytes(),
            sector: self.sector,
            virtual_sol: self.virtual_sol_reserve,
            virtual_tokens: self.virtual_token_reserve,
            real_sol: self.real_sol_reserve,
            graduated: self.graduated,
            bump: self.bump,
            takeover_active: self.takeover_active,
            takeover_initiator: self.takeover_initiator.to_bytes(),
            sabotage_penalty_bps: self.sabotage_penalty_bps,
            sabotage_end_ts: self.sabotage_end_ts,
        };
        encode_tagged(account_discriminator(Self::NAME), &raw)
    }
}

#[derive(BorshSerialize, BorshDeserialize)]
struct GlobalConfigLayout {
    admin: [u8; 32],
    platform_fee_bps: u16,
    yield_fee_bps: u16,
    yield_distributor: [u8; 32],
}

/// Protocol-wide fee configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfigAccount {
    pub admin: Pubkey,
    pub platform_fee_bps: u16,
    pub yield_fee_bps: u16,
    pub yield_distributor: Pubkey,
}

impl ProtocolConfigAccount {
    pub const NAME: &'static str = "GlobalConfig";

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let raw: GlobalConfigLayout = decode_tagged(data, Self::NAME)?;
        Ok(Self {
            admin: Pubkey::new_from_array(raw.admin),
            platform_fee_bps: raw.platform_fee_bps,
            yield_fee_bps: raw.yield_fee_bps,
            yield_distributor: Pubkey::new_from_array(raw.yield_distributor),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let raw = GlobalConfigLayout {
            admin: self.admin.to_bytes(),
            platform_fee_bps: self.platform_fee_bps,
            yield_fee_bps: self.yield_fee_bps,
            yield_distributor: self.yield_distributor.to_bytes(),
        };
        encode_tagged(account_discriminator(Self::NAME), &raw)
    }
}

#[derive(BorshSerialize, BorshDeserialize)]
struct MarketLayout {
    id: u64,
    title: String,
    end_timestamp: i64,
    resolved: bool,
    result: Option<bool>,
    total_pool: u64,
    yes_pool: u64,
    no_pool: u64,
    oracle: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketAccount {
    pub id: u64,
    pub title: String,
    pub end_timestamp: i64,
    pub resolved: bool,
    pub result: Option<bool>,
    pub total_pool: u64,
    pub yes_pool: u64,
    pub no_pool: u64,
    pub oracle: Pubkey,
}

impl MarketAccount {
    pub const NAME: &'static str = "Market";

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let raw: MarketLayout = decode_tagged(data, Self::NAME)?;
        Ok(Self {
            id: raw.id,
            title: raw.title,
            end_timestamp: raw.end_timestamp,
            resolved: raw.resolved,
            result: raw.result,
            total_pool: raw.total_pool,
            yes_pool: raw.yes_pool,
            no_pool: raw.no_pool,
            oracle: Pubkey::new_from_array(raw.oracle),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let raw = MarketLayout {
            id: self.id,
            title: self.title.clone(),
            end_timestamp: self.end_timestamp,
            resolved: self.resolved,
            result: self.result,
            total_pool: self.total_pool,
            yes_pool: self.yes_pool,
            no_pool: self.no_pool,
            oracle: self.oracle.to_bytes(),
        };
        encode_tagged(account_discriminator(Self::NAME), &raw)
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(BorshSerialize, BorshDeserialize)]
struct BusinessLaunchedLayout {
    mint: [u8; 32],
    name: String,
    symbol: String,
    creator: [u8; 32],
    timestamp: i64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct PriceUpdatedLayout {
    mint: [u8; 32],
    sol_reserves: u64,
    token_reserves: u64,
    timestamp: i64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct TakeoverInitiatedLayout {
    mint: [u8; 32],
    initiator: [u8; 32],
    stake: u64,
    timestamp: i64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct SabotageLayout {
    mint: [u8; 32],
    perpetrator: [u8; 32],
    penalty_bps: u16,
    timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessLaunched {
    pub mint: Pubkey,
    pub name: String,
    pub symbol: String,
    pub creator: Pubkey,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdated {
    pub mint: Pubkey,
    pub sol_reserves: u64,
    pub token_reserves: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeoverInitiated {
    pub mint: Pubkey,
    pub initiator: Pubkey,
    pub stake: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SabotageApplied {
    pub mint: Pubkey,
    pub perpetrator: Pubkey,
    pub penalty_bps: u16,
    pub timestamp: i64,
}

/// Ledger events the read model reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    BusinessLaunched(BusinessLaunched),
    PriceUpdated(PriceUpdated),
    TakeoverInitiated(TakeoverInitiated),
    Sabotage(SabotageApplied),
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::BusinessLaunched(_) => "BusinessLaunched",
            LedgerEvent::PriceUpdated(_) => "PriceUpdated",
            LedgerEvent::TakeoverInitiated(_) => "TakeoverInitiated",
            LedgerEvent::Sabotage(_) => "SabotageEvent",
        }
    }

    pub fn mint(&self) -> Pubkey {
        match self {
            LedgerEvent::BusinessLaunched(e) => e.mint,
            LedgerEvent::PriceUpdated(e) => e.mint,
            LedgerEvent::TakeoverInitiated(e) => e.mint,
            LedgerEvent::Sabotage(e) => e.mint,
        }
    }

    /// Decode a raw event payload. Unknown discriminators yield `Ok(None)`.
    pub fn decode(payload: &[u8]) -> Result<Option<Self>, CodecError> {
        if payload.len() < 8 {
            return Err(CodecError::TooShort(payload.len()));
        }
        let (tag, mut body) = payload.split_at(8);

        let event = if tag == event_discriminator("BusinessLaunched") {
            let raw = BusinessLaunchedLayout::deserialize(&mut body)?;
            LedgerEvent::BusinessLaunched(BusinessLaunched {
                mint: Pubkey::new_from_array(raw.mint),
                name: raw.name,
                symbol: raw.symbol,
                creator: Pubkey::new_from_array(raw.creator),
                timestamp: raw.timestamp,
            })
        } else if tag == event_discriminator("PriceUpdated") {
            let raw = PriceUpdatedLayout::deserialize(&mut body)?;
            LedgerEvent::PriceUpdated(PriceUpdated {
                mint: Pubkey::new_from_array(raw.mint),
                sol_reserves: raw.sol_reserves,
                token_reserves: raw.token_reserves,
                timestamp: raw.timestamp,
            })
        } else if tag == event_discriminator("TakeoverInitiated") {
            let raw = TakeoverInitiatedLayout::deserialize(&mut body)?;
            LedgerEvent::TakeoverInitiated(TakeoverInitiated {
                mint: Pubkey::new_from_array(raw.mint),
                initiator: Pubkey::new_from_array(raw.initiator),
                stake: raw.stake,
                timestamp: raw.timestamp,
            })
        } else if tag == event_discriminator("SabotageEvent") {
            let raw = SabotageLayout::deserialize(&mut body)?;
            LedgerEvent::Sabotage(SabotageApplied {
                mint: Pubkey::new_from_array(raw.mint),
                perpetrator: Pubkey::new_from_array(raw.perpetrator),
                penalty_bps: raw.penalty_bps,
                timestamp: raw.timestamp,
            })
        } else {
            return Ok(None);
        };

        Ok(Some(event))
    }

    pub fn encode(&self) -> Vec<u8> {
        let tag = event_discriminator(self.name());
        match self {
            LedgerEvent::BusinessLaunched(e) => encode_tagged(
                tag,
                &BusinessLaunchedLayout {
                    mint: e.mint.to_bytes(),
                    name: e.name.clone(),
                    symbol: e.symbol.clone(),
                    creator: e.creator.to_bytes(),
                    timestamp: e.timestamp,
                },
            ),
            LedgerEvent::PriceUpdated(e) => encode_tagged(
                tag,
                &PriceUpdatedLayout {
                    mint: e.mint.to_bytes(),
                    sol_reserves: e.sol_reserves,
                    token_reserves: e.token_reserves,
                    timestamp: e.timestamp,
                },
            ),
            LedgerEvent::TakeoverInitiated(e) => encode_tagged(
                tag,
                &TakeoverInitiatedLayout {
                    mint: e.mint.to_bytes(),
                    initiator: e.initiator.to_bytes(),
                    stake: e.stake,
                    timestamp: e.timestamp,
                },
            ),
            LedgerEvent::Sabotage(e) => encode_tagged(
                tag,
                &SabotageLayout {
                    mint: e.mint.to_bytes(),
                    perpetrator: e.perpetrator.to_bytes(),
                    penalty_bps: e.penalty_bps,
                    timestamp: e.timestamp,
                },
            ),
        }
    }

    /// Log line carrying this event, as the runtime prints it
    pub fn to_log_line(&self) -> String {
        format!("{}{}", PROGRAM_DATA_PREFIX, BASE64.encode(self.encode()))
    }

    /// Extract every recognised event from a transaction's logs, in order
    pub fn from_logs(logs: &[String]) -> Vec<Self> {
        logs.iter()
            .filter_map(|line| line.strip_prefix(PROGRAM_DATA_PREFIX))
            .filter_map(|encoded| match BASE64.decode(encoded.trim()) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    debug!("Skipping non-base64 program data: {}", e);
                    None
                }
            })
            .filter_map(|bytes| match Self::decode(&bytes) {
                Ok(event) => event,
                Err(e) => {
                    debug!("Skipping undecodable program data: {}", e);
                    None
                }
            })
            .collect()
    }
}
