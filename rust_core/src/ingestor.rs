//! Push path: applies ledger events to the read model as they arrive.
//!
//! Events are consumed from a single ordered stream and applied one at a
//! time, so events for the same business land in emission order. Shutdown
//! is checked between events; the event being applied always completes.

use crate::db::{execute_with_retry, BackendError, RetryPolicy};
use crate::ledger::{BusinessLaunched, LedgerEvent, PriceUpdated};
use crate::models::{BusinessMetadata, TokenRecord, DEFAULT_TOTAL_SUPPLY, INITIAL_PRICE};
use crate::pricing;
use crate::store::ReadModelStore;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Launched { ticker: String },
    PriceRecorded {
        ticker: String,
        price: f64,
        /// False when this exact (ticker, timestamp) was already recorded
        appended: bool,
    },
    /// Cache invalidated so the next read picks up new curve flags
    Invalidated,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ZeroTokenReserve,
    UnknownMint,
    InvalidTimestamp,
    EmptySymbol,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub launches: u64,
    pub price_updates: u64,
    pub duplicates: u64,
    pub invalidations: u64,
    pub skipped: u64,
    pub failures: u64,
}

impl IngestStats {
    fn record(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Launched { .. } => self.launches += 1,
            ApplyOutcome::PriceRecorded { appended: true, .. } => self.price_updates += 1,
            ApplyOutcome::PriceRecorded { appended: false, .. } => self.duplicates += 1,
            ApplyOutcome::Invalidated => self.invalidations += 1,
            ApplyOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

fn event_time(timestamp: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(timestamp, 0).single()
}

pub struct EventIngestor {
    store: Arc<ReadModelStore>,
    retry: RetryPolicy,
}

impl EventIngestor {
    pub fn new(store: Arc<ReadModelStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Apply one event. Idempotent: replaying an event leaves the read
    /// model unchanged.
    pub async fn apply(&self, event: &LedgerEvent) -> Result<ApplyOutcome, BackendError> {
        match event {
            LedgerEvent::BusinessLaunched(launch) => self.apply_launch(launch).await,
            LedgerEvent::PriceUpdated(update) => self.apply_price(update).await,
            LedgerEvent::TakeoverInitiated(e) => {
                info!(mint = %e.mint, initiator = %e.initiator, stake = e.stake, "Takeover initiated");
                self.store.invalidate();
                Ok(ApplyOutcome::Invalidated)
            }
            LedgerEvent::Sabotage(e) => {
                info!(mint = %e.mint, penalty_bps = e.penalty_bps, "Sabotage applied");
                self.store.invalidate();
                Ok(ApplyOutcome::Invalidated)
            }
        }
    }

    async fn apply_launch(&self, launch: &BusinessLaunched) -> Result<ApplyOutcome, BackendError> {
        let ticker = launch.symbol.trim().to_string();
        if ticker.is_empty() {
            warn!(mint = %launch.mint, "Launch event without symbol");
            return Ok(ApplyOutcome::Skipped(SkipReason::EmptySymbol));
        }
        let Some(at) = event_time(launch.timestamp) else {
            warn!(ticker = %ticker, timestamp = launch.timestamp, "Launch event with invalid timestamp");
            return Ok(ApplyOutcome::Skipped(SkipReason::InvalidTimestamp));
        };

        self.store
            .upsert_metadata(BusinessMetadata::launched(&ticker, &launch.name))
            .await;

        let token = TokenRecord {
            ticker: ticker.clone(),
            mint_address: launch.mint.to_string(),
            total_supply: DEFAULT_TOTAL_SUPPLY,
        };
        execute_with_retry(|| self.store.record_token(&token), self.retry).await?;
        execute_with_retry(|| self.store.record_price(&ticker, INITIAL_PRICE, at), self.retry)
            .await?;

        self.store.reconcile_speculative(&ticker);
        info!(ticker = %ticker, mint = %launch.mint, creator = %launch.creator, "Business launched");
        Ok(ApplyOutcome::Launched { ticker })
    }

    async fn apply_price(&self, update: &PriceUpdated) -> Result<ApplyOutcome, BackendError> {
        let Some(price) = pricing::scaled_price(
            u128::from(update.sol_reserves),
            u128::from(update.token_reserves),
        ) else {
            warn!(mint = %update.mint, "Price update with zero token reserve skipped");
            return Ok(ApplyOutcome::Skipped(SkipReason::ZeroTokenReserve));
        };
        let Some(at) = event_time(update.timestamp) else {
            warn!(mint = %update.mint, timestamp = update.timestamp, "Price update with invalid timestamp");
            return Ok(ApplyOutcome::Skipped(SkipReason::InvalidTimestamp));
        };

        let mint = update.mint.to_string();
        let ticker = execute_with_retry(|| self.store.ticker_for_mint(&mint), self.retry).await?;
        let Some(ticker) = ticker else {
            debug!(mint = %mint, "Price update for unknown mint");
            return Ok(ApplyOutcome::Skipped(SkipReason::UnknownMint));
        };

        let appended =
            execute_with_retry(|| self.store.record_price(&ticker, price, at), self.retry).await?;
        self.store.invalidate();

        if appended {
            debug!(ticker = %ticker, price, "Price recorded");
        } else {
            debug!(ticker = %ticker, "Duplicate price update ignored");
        }
        Ok(ApplyOutcome::PriceRecorded {
            ticker,
            price,
            appended,
        })
    }

    /// Consume `events` until the stream ends or shutdown is signalled
    pub async fn run<S>(&self, mut events: S, mut shutdown: watch::Receiver<bool>) -> IngestStats
    where
        S: Stream<Item = LedgerEvent> + Unpin,
    {
        let mut stats = IngestStats::default();
        info!("Event ingestor started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("Event ingestor shutdown requested");
                    break;
                }
                next = events.next() => {
                    let Some(event) = next else {
                        warn!("Ledger event stream ended");
                        break;
                    };
                    match self.apply(&event).await {
                        Ok(outcome) => stats.record(&outcome),
                        Err(e) => {
                            stats.failures += 1;
                            error!(
                                mode = "degraded",
                                event = event.name(),
                                mint = %event.mint(),
                                "Failed to apply ledger event: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        info!(
            launches = stats.launches,
            price_updates = stats.price_updates,
            duplicates = stats.duplicates,
            failures = stats.failures,
            "Event ingestor stopped"
        );
        stats
    }

    /// Run on a background task
    pub fn spawn<S>(self: Arc<Self>, events: S) -> IngestorHandle
    where
        S: Stream<Item = LedgerEvent> + Unpin + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(events, shutdown_rx).await });
        IngestorHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

pub struct IngestorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<IngestStats>,
}

impl IngestorHandle {
    /// Stop after the event in progress and return the totals
    pub async fn shutdown(self) -> IngestStats {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Event ingestor task failed: {}", e);
                IngestStats::default()
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
