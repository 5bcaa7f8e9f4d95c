//! HTTP clients for external market data.

pub mod kalshi;

pub use kalshi::{KalshiClient, KalshiMarket};
