//! PostgreSQL read-model backend.

use super::{BackendError, ReadModelBackend};
use crate::models::{BusinessMetadata, LatestPrice, PriceHistoryEntry, Sector, TokenRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS companies (
        ticker VARCHAR(10) PRIMARY KEY,
        name VARCHAR(100) NOT NULL,
        sector VARCHAR(50) NOT NULL,
        description TEXT,
        region VARCHAR(100),
        socials JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS tokens (
        ticker VARCHAR(10) PRIMARY KEY,
        mint_address VARCHAR(64) UNIQUE NOT NULL,
        total_supply BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS prices (
        ticker VARCHAR(10) PRIMARY KEY,
        price DOUBLE PRECISION NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS price_history (
        ticker VARCHAR(10) NOT NULL,
        price DOUBLE PRECISION NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (ticker, timestamp)
    )"#,
];

#[derive(Clone, Debug)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn company_from_row(row: &PgRow) -> Result<BusinessMetadata, BackendError> {
    let sector: String = row.try_get("sector")?;
    let socials: Option<String> = row.try_get("socials")?;
    let socials: BTreeMap<String, String> = socials
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| BackendError::Decode(format!("socials: {}", e)))?
        .unwrap_or_default();

    Ok(BusinessMetadata {
        ticker: row.try_get("ticker")?,
        name: row.try_get("name")?,
        sector: Sector::from_label(&sector),
        description: row
            .try_get::<Option<String>, _>("description")?
            .unwrap_or_default(),
        region: row.try_get::<Option<String>, _>("region")?.unwrap_or_default(),
        socials,
    })
}

fn token_from_row(row: &PgRow) -> Result<TokenRecord, BackendError> {
    let supply: i64 = row.try_get("total_supply")?;
    Ok(TokenRecord {
        ticker: row.try_get("ticker")?,
        mint_address: row.try_get("mint_address")?,
        total_supply: u64::try_from(supply)
            .map_err(|_| BackendError::Decode(format!("negative total_supply {}", supply)))?,
    })
}

#[async_trait]
impl ReadModelBackend for PgBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn ensure_schema(&self) -> Result<(), BackendError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Read-model schema ensured");
        Ok(())
    }

    async fn load_companies(&self) -> Result<Vec<BusinessMetadata>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, name, sector, description, region, socials::text AS socials
            FROM companies
            ORDER BY created_at, ticker
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(company_from_row).collect()
    }

    async fn insert_company(&self, company: &BusinessMetadata) -> Result<bool, BackendError> {
        let socials = serde_json::to_string(&company.socials)
            .map_err(|e| BackendError::Decode(format!("socials: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO companies (ticker, name, sector, description, region, socials)
            VALUES ($1, $2, $3, $4, $5, $6::jsonb)
            ON CONFLICT (ticker) DO NOTHING
            "#,
        )
        .bind(&company.ticker)
        .bind(&company.name)
        .bind(company.sector.as_str())
        .bind(&company.description)
        .bind(&company.region)
        .bind(socials)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            info!("Persisted company {}", company.ticker);
        }
        Ok(inserted)
    }

    async fn insert_token(&self, token: &TokenRecord) -> Result<bool, BackendError> {
        let supply = i64::try_from(token.total_supply)
            .map_err(|_| BackendError::Query(format!("total_supply {} out of range", token.total_supply)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO tokens (ticker, mint_address, total_supply)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&token.ticker)
        .bind(&token.mint_address)
        .bind(supply)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn token_by_mint(&self, mint_address: &str) -> Result<Option<TokenRecord>, BackendError> {
        let row = sqlx::query(
            "SELECT ticker, mint_address, total_supply FROM tokens WHERE mint_address = $1",
        )
        .bind(mint_address)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(token_from_row).transpose()
    }

    async fn tokens(&self) -> Result<Vec<TokenRecord>, BackendError> {
        let rows = sqlx::query("SELECT ticker, mint_address, total_supply FROM tokens")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(token_from_row).collect()
    }

    async fn upsert_latest_price(
        &self,
        ticker: &str,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        sqlx::query(
            r#"
            INSERT INTO prices (ticker, price, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (ticker) DO UPDATE
            SET price = EXCLUDED.price, updated_at = EXCLUDED.updated_at
            WHERE prices.updated_at <= EXCLUDED.updated_at
            "#,
        )
        .bind(ticker)
        .bind(price)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_price(&self, ticker: &str) -> Result<Option<LatestPrice>, BackendError> {
        let row = sqlx::query("SELECT ticker, price, updated_at FROM prices WHERE ticker = $1")
            .bind(ticker)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(LatestPrice {
                ticker: row.try_get("ticker")?,
                price: row.try_get("price")?,
                updated_at: row.try_get("updated_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn append_price_history(&self, entry: &PriceHistoryEntry) -> Result<bool, BackendError> {
        let result = sqlx::query(
            r#"
            INSERT INTO price_history (ticker, price, timestamp)
            VALUES ($1, $2, $3)
            ON CONFLICT (ticker, timestamp) DO NOTHING
            "#,
        )
        .bind(&entry.ticker)
        .bind(entry.price)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn price_history(&self, ticker: &str) -> Result<Vec<PriceHistoryEntry>, BackendError> {
        let rows = sqlx::query(
            "SELECT ticker, price, timestamp FROM price_history WHERE ticker = $1 ORDER BY timestamp",
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PriceHistoryEntry, BackendError> {
                Ok(PriceHistoryEntry {
                    ticker: row.try_get("ticker")?,
                    price: row.try_get("price")?,
                    timestamp: row.try_get("timestamp")?,
                })
            })
            .collect()
    }
}
