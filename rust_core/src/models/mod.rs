// Shared models for the MarsCorp exchange
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_TOTAL_SUPPLY: u64 = 1_000_000_000;

/// Price recorded for a business at launch, before any trade
pub const INITIAL_PRICE: f64 = 0.000_000_037_5;

pub const LAUNCHED_DESCRIPTION: &str = "Launched via MarsCorp Exchange";
pub const LAUNCHED_REGION: &str = "Global";

// ============================================================================
// Businesses
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sector {
    Energy,
    Mining,
    Tech,
    Terraforming,
    Logistics,
    Governance,
}

impl Sector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sector::Energy => "Energy",
            Sector::Mining => "Mining",
            Sector::Tech => "Tech",
            Sector::Terraforming => "Terraforming",
            Sector::Logistics => "Logistics",
            Sector::Governance => "Governance",
        }
    }

    /// Lenient parse of a stored label; unknown labels become Tech
    pub fn from_label(label: &str) -> Self {
        let lower = label.trim().to_lowercase();
        if lower.contains("energy") {
            Sector::Energy
        } else if lower.contains("mining") {
            Sector::Mining
        } else if lower.contains("terraform") {
            Sector::Terraforming
        } else if lower.contains("logistic") {
            Sector::Logistics
        } else if lower.contains("govern") {
            Sector::Governance
        } else {
            Sector::Tech
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive metadata for a business, keyed by its ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessMetadata {
    pub ticker: String,
    pub name: String,
    pub sector: Sector,
    pub description: String,
    pub region: String,
    #[serde(default)]
    pub socials: BTreeMap<String, String>,
}

impl BusinessMetadata {
    pub fn new(ticker: &str, name: &str, sector: Sector, description: &str, region: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            name: name.to_string(),
            sector,
            description: description.to_string(),
            region: region.to_string(),
            socials: BTreeMap::new(),
        }
    }

    /// Metadata recorded for a business first seen through a launch event
    pub fn launched(ticker: &str, name: &str) -> Self {
        Self::new(ticker, name, Sector::Tech, LAUNCHED_DESCRIPTION, LAUNCHED_REGION)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub ticker: String,
    pub mint_address: String,
    pub total_supply: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestPrice {
    pub ticker: String,
    pub price: f64,
    pub updated_at: DateTime<Utc>,
}

/// One observed price; `(ticker, timestamp)` is unique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub ticker: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Takeover {
    pub active: bool,
    /// 0-100
    pub progress: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Confirmed,
    /// Locally announced launch not yet seen on the ledger
    Speculative,
}

/// A business as presented to consumers: metadata joined with ledger state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedBusinessRow {
    /// Bonding curve account address
    pub id: String,
    pub mint_address: String,
    #[serde(flatten)]
    pub metadata: BusinessMetadata,
    pub price: f64,
    pub market_cap: f64,
    pub volume: f64,
    pub apy: f64,
    pub takeover: Takeover,
    pub status: RowStatus,
}

impl DerivedBusinessRow {
    pub fn ticker(&self) -> &str {
        &self.metadata.ticker
    }

    pub fn is_speculative(&self) -> bool {
        self.status == RowStatus::Speculative
    }
}

// ============================================================================
// Prediction Markets
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketCategory {
    Atmospheric,
    Corporate,
    Commodities,
    Governance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionMarket {
    pub id: String,
    pub question: String,
    pub category: MarketCategory,
    pub volume: f64,
    pub liquidity: f64,
    /// 0.0-1.0
    pub prob_yes: f64,
    pub ends_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub oracle: Option<String>,
    #[serde(default)]
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Native,
    ExternalRegulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedMarket {
    #[serde(flatten)]
    pub market: PredictionMarket,
    pub provenance: Provenance,
}
