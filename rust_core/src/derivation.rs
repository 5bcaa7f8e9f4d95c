//! Program-derived address derivation.
//!
//! Every on-ledger record of the exchange lives at an address computed from
//! a namespace tag plus identifying seeds. Derivation is pure: the same
//! inputs always produce the same address and bump on every call site.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::{Pubkey, MAX_SEEDS, MAX_SEED_LEN};
use spl_associated_token_account::get_associated_token_address_with_program_id;
use std::fmt;
use thiserror::Error;

pub const TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");

pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Seed namespaces used by the exchange program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Mint,
    Curve,
    Vesting,
    VestingVault,
    Config,
    Market,
}

impl Namespace {
    pub fn tag(&self) -> &'static str {
        match self {
            Namespace::Mint => "mint",
            Namespace::Curve => "curve",
            Namespace::Vesting => "vesting",
            Namespace::VestingVault => "vesting_vault",
            Namespace::Config => "config",
            Namespace::Market => "market",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DerivationError {
    #[error("ticker must not be empty")]
    EmptyTicker,

    #[error("seed for '{namespace}' is {len} bytes (max {MAX_SEED_LEN})")]
    SeedTooLong { namespace: Namespace, len: usize },

    #[error("too many seeds for '{namespace}': {count}")]
    TooManySeeds { namespace: Namespace, count: usize },

    #[error("no viable bump for '{namespace}' address")]
    NoViableBump { namespace: Namespace },
}

/// Identifier of a prediction market.
///
/// The ledger seeds markets with an unsigned 64-bit id. Opaque ids are
/// folded into that space with the first 8 bytes of their SHA-256 digest,
/// so two distinct opaque ids can collide; callers that need uniqueness
/// should allocate numeric ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketId {
    Numeric(u64),
    Opaque(String),
}

impl MarketId {
    /// Decimal strings become numeric ids, anything else is opaque
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<u64>() {
            Ok(id) => MarketId::Numeric(id),
            Err(_) => MarketId::Opaque(trimmed.to_string()),
        }
    }

    /// The u64 the ledger stores for this market
    pub fn ledger_id(&self) -> u64 {
        match self {
            MarketId::Numeric(id) => *id,
            MarketId::Opaque(raw) => {
                let digest = Sha256::digest(raw.as_bytes());
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&digest[..8]);
                u64::from_le_bytes(prefix)
            }
        }
    }

    /// Fixed-width little-endian seed
    pub fn seed(&self) -> [u8; 8] {
        self.ledger_id().to_le_bytes()
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketId::Numeric(id) => write!(f, "{}", id),
            MarketId::Opaque(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DerivedAddress {
    pub address: Pubkey,
    pub bump: u8,
}

/// Every address a business owns, derived from its creator and ticker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessAddresses {
    pub mint: Pubkey,
    pub curve: Pubkey,
    pub vesting: Pubkey,
    pub vesting_vault: Pubkey,
    pub curve_token_vault: Pubkey,
}

/// Derive `namespace || seeds` under `program_id`.
pub fn derive(
    program_id: &Pubkey,
    namespace: Namespace,
    seeds: &[&[u8]],
) -> Result<DerivedAddress, DerivationError> {
    // One slot is taken by the namespace tag and one by the bump.
    if seeds.len() + 2 > MAX_SEEDS {
        return Err(DerivationError::TooManySeeds {
            namespace,
            count: seeds.len(),
        });
    }
    if let Some(seed) = seeds.iter().find(|s| s.len() > MAX_SEED_LEN) {
        return Err(DerivationError::SeedTooLong {
            namespace,
            len: seed.len(),
        });
    }

    let mut all: Vec<&[u8]> = Vec::with_capacity(seeds.len() + 1);
    all.push(namespace.tag().as_bytes());
    all.extend_from_slice(seeds);

    Pubkey::try_find_program_address(&all, program_id)
        .map(|(address, bump)| DerivedAddress { address, bump })
        .ok_or(DerivationError::NoViableBump { namespace })
}

/// Address deriver bound to one deployed program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressDeriver {
    program_id: Pubkey,
}

impl AddressDeriver {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    pub fn mint(&self, creator: &Pubkey, ticker: &str) -> Result<DerivedAddress, DerivationError> {
        if ticker.is_empty() {
            return Err(DerivationError::EmptyTicker);
        }
        derive(
            &self.program_id,
            Namespace::Mint,
            &[creator.as_ref(), ticker.as_bytes()],
        )
    }

    pub fn curve(&self, mint: &Pubkey) -> Result<DerivedAddress, DerivationError> {
        derive(&self.program_id, Namespace::Curve, &[mint.as_ref()])
    }

    pub fn vesting(&self, mint: &Pubkey) -> Result<DerivedAddress, DerivationError> {
        derive(&self.program_id, Namespace::Vesting, &[mint.as_ref()])
    }

    pub fn vesting_vault(&self, mint: &Pubkey) -> Result<DerivedAddress, DerivationError> {
        derive(&self.program_id, Namespace::VestingVault, &[mint.as_ref()])
    }

    pub fn config(&self) -> Result<DerivedAddress, DerivationError> {
        derive(&self.program_id, Namespace::Config, &[])
    }

    pub fn market(&self, id: &MarketId) -> Result<DerivedAddress, DerivationError> {
        let seed = id.seed();
        derive(&self.program_id, Namespace::Market, &[&seed])
    }

    /// Token account holding `mint` on behalf of `owner`
    pub fn token_account(&self, owner: &Pubkey, mint: &Pubkey) -> Pubkey {
        get_associated_token_address_with_program_id(owner, mint, &TOKEN_PROGRAM_ID)
    }

    /// Derive the full address set of the business `ticker` launched by `creator`
    pub fn business(
        &self,
        creator: &Pubkey,
        ticker: &str,
    ) -> Result<BusinessAddresses, DerivationError> {
        let mint = self.mint(creator, ticker)?.address;
        self.business_for_mint(mint)
    }

    /// Same as [`AddressDeriver::business`] when the mint is already known
    pub fn business_for_mint(&self, mint: Pubkey) -> Result<BusinessAddresses, DerivationError> {
        let curve = self.curve(&mint)?.address;
        Ok(BusinessAddresses {
            mint,
            curve,
            vesting: self.vesting(&mint)?.address,
            vesting_vault: self.vesting_vault(&mint)?.address,
            curve_token_vault: self.token_account(&curve, &mint),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn deriver() -> AddressDeriver {
        AddressDeriver::new(
            Pubkey::from_str("5GKfHwujgiKLXP84f28HyGL5FJ3AnunKsVGmKDmG6RXi").unwrap(),
        )
    }

    fn seed_wallet() -> Pubkey {
        Pubkey::from_str("9BeBqNy15zt5mq112RrR35GaHNoqkPNFe1brhtEocdpU").unwrap()
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let d = deriver();
        let a = d.business(&seed_wallet(), "DUST").unwrap();
        let b = d.business(&seed_wallet(), "DUST").unwrap();
        assert_eq!(a, b);
        assert_ne!(a.mint, a.curve);
    }

    #[test]
    fn test_distinct_tickers_distinct_addresses() {
        let d = deriver();
        let dust = d.business(&seed_wallet(), "DUST").unwrap();
        let iron = d.business(&seed_wallet(), "IRON").unwrap();
        assert_ne!(dust.mint, iron.mint);
        assert_ne!(dust.curve, iron.curve);
    }

    #[test]
    fn test_mint_matches_raw_program_address() {
        let d = deriver();
        let (expected, bump) = Pubkey::find_program_address(
            &[b"mint", seed_wallet().as_ref(), b"SOLR"],
            d.program_id(),
        );
        let derived = d.mint(&seed_wallet(), "SOLR").unwrap();
        assert_eq!(derived.address, expected);
        assert_eq!(derived.bump, bump);
    }

    #[test]
    fn test_market_seed_is_little_endian() {
        let d = deriver();
        let (expected, _) = Pubkey::find_program_address(
            &[b"market", &7u64.to_le_bytes()],
            d.program_id(),
        );
        assert_eq!(d.market(&MarketId::Numeric(7)).unwrap().address, expected);
    }

    #[test]
    fn test_opaque_market_id() {
        let id = MarketId::parse("KXGDP-26");
        assert_eq!(id, MarketId::Opaque("KXGDP-26".to_string()));
        assert_eq!(id.ledger_id(), MarketId::parse("KXGDP-26").ledger_id());
        assert_ne!(id.ledger_id(), MarketId::parse("KXGDP-27").ledger_id());
        assert_eq!(MarketId::parse(" 12 "), MarketId::Numeric(12));
    }

    #[test]
    fn test_curve_vault_is_token_account_of_curve() {
        let d = deriver();
        let biz = d.business(&seed_wallet(), "H2O").unwrap();
        assert_eq!(
            biz.curve_token_vault,
            spl_associated_token_account::get_associated_token_address(&biz.curve, &biz.mint)
        );
    }

    #[test]
    fn test_empty_and_oversized_tickers_rejected() {
        let d = deriver();
        assert_eq!(
            d.mint(&seed_wallet(), "").unwrap_err(),
            DerivationError::EmptyTicker
        );
        let long = "X".repeat(40);
        assert!(matches!(
            d.mint(&seed_wallet(), &long),
            Err(DerivationError::SeedTooLong { len: 40, .. })
        ));
    }
}
