//! Program log subscription with automatic reconnection and exponential backoff
//!
//! Opens a websocket `logsSubscribe` filtered to the exchange program,
//! decodes events from each confirmed transaction and forwards them over a
//! channel. Dropped connections are re-established with jittered backoff.

use super::codec::LedgerEvent;
use super::LedgerError;
use futures_util::stream::{Stream, StreamExt};
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for reconnection behavior
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    /// Maximum consecutive failures before pausing reconnection (default: 10)
    pub max_consecutive_failures: u32,
    /// Base delay in milliseconds for exponential backoff (default: 1000ms)
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (default: 60000ms = 1 minute)
    pub max_delay_ms: u64,
    /// Jitter percentage (default: 0.1 = ±10%)
    pub jitter_pct: f64,
    /// Pause after too many consecutive failures (default: 60s)
    pub cooldown: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ReconnectConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            max_consecutive_failures: std::env::var("LEDGER_RECONNECT_MAX_FAILURES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            base_delay_ms: std::env::var("LEDGER_RECONNECT_BASE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            max_delay_ms: std::env::var("LEDGER_RECONNECT_MAX_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60000),
            jitter_pct: std::env::var("LEDGER_RECONNECT_JITTER_PCT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.1),
            cooldown: Duration::from_secs(
                std::env::var("LEDGER_RECONNECT_COOLDOWN_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }

    /// Calculate exponential backoff delay with jitter
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay_ms as f64;
        let exponential_ms = base_ms * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped_ms = exponential_ms.min(self.max_delay_ms as f64);

        let jitter_range = capped_ms * self.jitter_pct;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_ms = (capped_ms + jitter).max(0.0);

        Duration::from_millis(final_ms as u64)
    }
}

/// Statistics for monitoring the subscription
#[derive(Debug, Default)]
pub struct ReconnectStats {
    pub connect_attempts: AtomicU64,
    pub successful_connects: AtomicU64,
    pub failed_connects: AtomicU64,
    pub consecutive_failures: AtomicU32,
    /// Events forwarded to the consumer
    pub events_forwarded: AtomicU64,
}

impl ReconnectStats {
    pub fn record_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful_connects.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_connects.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// Log subscription for one program
#[derive(Clone, Debug)]
pub struct LogSubscription {
    ws_url: String,
    program_id: Pubkey,
    config: ReconnectConfig,
    stats: Arc<ReconnectStats>,
}

impl LogSubscription {
    pub fn new(ws_url: &str, program_id: Pubkey) -> Self {
        Self {
            ws_url: ws_url.to_string(),
            program_id,
            config: ReconnectConfig::default(),
            stats: Arc::new(ReconnectStats::default()),
        }
    }

    pub fn with_config(mut self, config: ReconnectConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stats(&self) -> &Arc<ReconnectStats> {
        &self.stats
    }

    /// Start the background connection task.
    ///
    /// The stream yields events in ledger emission order. The guard tears
    /// down the remote subscription when unsubscribed or dropped.
    pub fn into_event_stream(self) -> (LedgerEventStream, SubscriptionGuard) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            subscription_task(self, sender, shutdown_rx).await;
        });

        (
            LedgerEventStream { receiver },
            SubscriptionGuard {
                shutdown: shutdown_tx,
                task: Some(task),
            },
        )
    }
}

/// Decoded ledger events, ends once the subscription is torn down
pub struct LedgerEventStream {
    receiver: mpsc::UnboundedReceiver<LedgerEvent>,
}

impl LedgerEventStream {
    /// Stream fed directly by a channel, for replaying captured events
    pub fn from_receiver(receiver: mpsc::UnboundedReceiver<LedgerEvent>) -> Self {
        Self { receiver }
    }
}

impl Stream for LedgerEventStream {
    type Item = LedgerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

pub struct SubscriptionGuard {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionGuard {
    /// Unsubscribe and wait for the connection to close
    pub async fn unsubscribe(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Log subscription task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

enum SessionEnd {
    Shutdown,
    ReceiverGone,
    StreamEnded,
}

async fn run_session(
    subscription: &LogSubscription,
    sender: &mpsc::UnboundedSender<LedgerEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SessionEnd, LedgerError> {
    let client = PubsubClient::new(&subscription.ws_url)
        .await
        .map_err(|e| LedgerError::Subscription(e.to_string()))?;

    let (mut notifications, unsubscribe) = client
        .logs_subscribe(
            RpcTransactionLogsFilter::Mentions(vec![subscription.program_id.to_string()]),
            RpcTransactionLogsConfig {
                commitment: Some(CommitmentConfig::confirmed()),
            },
        )
        .await
        .map_err(|e| LedgerError::Subscription(e.to_string()))?;

    subscription.stats.record_success();
    info!(
        "Subscribed to logs of {} (total connects: {})",
        subscription.program_id,
        subscription.stats.successful_connects.load(Ordering::Relaxed)
    );

    let end = 'read: loop {
        tokio::select! {
            _ = shutdown.changed() => break 'read SessionEnd::Shutdown,
            notification = notifications.next() => {
                let Some(response) = notification else {
                    break 'read SessionEnd::StreamEnded;
                };
                let logs = response.value;
                if logs.err.is_some() {
                    debug!("Ignoring failed transaction {}", logs.signature);
                    continue 'read;
                }
                for event in LedgerEvent::from_logs(&logs.logs) {
                    if sender.send(event).is_err() {
                        break 'read SessionEnd::ReceiverGone;
                    }
                    subscription.stats.events_forwarded.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    };

    drop(notifications);
    unsubscribe().await;
    if let Err(e) = client.shutdown().await {
        debug!("Pubsub client shutdown error: {}", e);
    }

    Ok(end)
}

/// Background task that handles reconnection logic
async fn subscription_task(
    subscription: LogSubscription,
    sender: mpsc::UnboundedSender<LedgerEvent>,
    shutdown: watch::Receiver<bool>,
) {
    let subscription_ref = &subscription;
    let sender = &sender;
    reconnect_loop(
        &subscription.config,
        &subscription.stats,
        shutdown,
        move |shutdown| run_session(subscription_ref, sender, shutdown),
    )
    .await;

    info!("Log subscription for {} closed", subscription.program_id);
}

/// Run sessions until shutdown or until the consumer goes away. Every
/// session that ends without either counts as a failure and waits out the
/// backoff before the next connect.
async fn reconnect_loop<F, Fut>(
    config: &ReconnectConfig,
    stats: &ReconnectStats,
    mut shutdown: watch::Receiver<bool>,
    mut session: F,
) where
    F: FnMut(watch::Receiver<bool>) -> Fut,
    Fut: Future<Output = Result<SessionEnd, LedgerError>>,
{
    loop {
        if *shutdown.borrow() {
            break;
        }

        let consecutive_failures = stats.get_consecutive_failures();
        if consecutive_failures >= config.max_consecutive_failures {
            error!(
                "Log subscription failed {} times in a row. Pausing for {:?}.",
                consecutive_failures, config.cooldown
            );
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(config.cooldown) => {}
            }
            stats.consecutive_failures.store(0, Ordering::Relaxed);
            continue;
        }

        stats.record_attempt();
        let result = session(shutdown.clone()).await;
        let delay = match result {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::ReceiverGone) => {
                info!("Event receiver dropped, stopping log subscription");
                break;
            }
            Ok(SessionEnd::StreamEnded) => {
                stats.record_failure();
                let delay = config.calculate_delay(stats.get_consecutive_failures());
                warn!("Log subscription stream ended, reconnecting in {:?}...", delay);
                delay
            }
            Err(e) => {
                stats.record_failure();
                let attempt = stats.get_consecutive_failures();
                let delay = config.calculate_delay(attempt);
                error!(
                    "Log subscription failed (attempt {}): {}. Retrying in {:?}...",
                    attempt, e, delay
                );
                delay
            }
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
