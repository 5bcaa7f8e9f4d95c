//! Configuration for indexer_rust

use anyhow::{anyhow, Result};
use marscorp_core::CoreConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub core: CoreConfig,

    // Database; without it the read model runs in memory only
    pub database_url: Option<String>,

    // Loops
    pub warm_interval: Duration,

    // External market feed
    pub external_feed_enabled: bool,
}

impl IndexerConfig {
    pub fn from_env() -> Result<Self> {
        let warm_interval_secs = parse_u64("INDEXER_WARM_INTERVAL_SECS", 5)?;
        if warm_interval_secs == 0 {
            return Err(anyhow!("INDEXER_WARM_INTERVAL_SECS must be > 0"));
        }

        Ok(Self {
            core: CoreConfig::from_env(),
            database_url: env::var("DATABASE_URL")
                .ok()
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            warm_interval: Duration::from_secs(warm_interval_secs),
            external_feed_enabled: parse_bool("INDEXER_EXTERNAL_FEED", true)?,
        })
    }
}

/// Parse environment variable as u64 with default fallback
fn parse_u64(var_name: &str, default: u64) -> Result<u64> {
    match env::var(var_name) {
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|_| anyhow!("{} must be a valid u64", var_name)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(var_name: &str, default: bool) -> Result<bool> {
    match env::var(var_name) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(anyhow!("{} must be a boolean", var_name)),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u64_with_default() {
        assert_eq!(parse_u64("INDEXER_NON_EXISTENT_VAR", 7).unwrap(), 7);
    }

    #[test]
    fn test_parse_bool_with_default() {
        assert!(parse_bool("INDEXER_NON_EXISTENT_FLAG", true).unwrap());
    }
}
