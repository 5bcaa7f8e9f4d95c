//! Event ingestion tests
//!
//! Feeds ledger events through the ingestor into an in-memory backend and
//! checks durable prices, replay behavior and speculative reconciliation.

mod common;

use common::{approx, harness, put_business_curve, put_protocol_config, Harness, MockLedger};
use marscorp_core::db::{MemoryBackend, ReadModelBackend, RetryPolicy};
use marscorp_core::ingestor::{ApplyOutcome, IngestStats};
use marscorp_core::ledger::{BusinessLaunched, LedgerEvent, LedgerEventStream, PriceUpdated, SabotageApplied};
use marscorp_core::models::{RowStatus, Sector, INITIAL_PRICE};
use marscorp_core::protocol::CreateBusinessRequest;
use marscorp_core::{EventIngestor, ProtocolClient};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

fn ingestor(h: &Harness) -> Arc<EventIngestor> {
    Arc::new(EventIngestor::new(h.store.clone()).with_retry(RetryPolicy {
        max_attempts: 2,
        base_backoff_ms: 1,
        max_backoff_ms: 1,
    }))
}

fn launch(mint: Pubkey, symbol: &str, timestamp: i64) -> LedgerEvent {
    LedgerEvent::BusinessLaunched(BusinessLaunched {
        mint,
        name: format!("{} Holdings", symbol),
        symbol: symbol.to_string(),
        creator: Pubkey::new_unique(),
        timestamp,
    })
}

fn price_update(mint: Pubkey, sol_reserves: u64, token_reserves: u64, timestamp: i64) -> LedgerEvent {
    LedgerEvent::PriceUpdated(PriceUpdated {
        mint,
        sol_reserves,
        token_reserves,
        timestamp,
    })
}

#[tokio::test]
async fn test_price_update_records_latest_and_history() {
    let h = harness();
    let ingestor = ingestor(&h);
    let mint = Pubkey::new_unique();

    ingestor
        .apply(&launch(mint, "IRON", 1_700_000_000))
        .await
        .expect("Launch should apply");
    let outcome = ingestor
        .apply(&price_update(mint, 1_234_567_890, 1_000_000, 1_700_000_060))
        .await
        .expect("Price update should apply");

    match outcome {
        ApplyOutcome::PriceRecorded { ticker, price, appended } => {
            assert_eq!(ticker, "IRON");
            assert!(approx(price, 1.23456789), "price was {}", price);
            assert!(appended);
        }
        other => panic!("Unexpected outcome: {:?}", other),
    }

    let latest = h
        .store
        .latest_price("IRON")
        .await
        .expect("Backend should be reachable")
        .expect("Latest price should exist");
    assert!(approx(latest.price, 1.23456789));
    assert_eq!(latest.updated_at.timestamp(), 1_700_000_060);

    let history = h.store.price_history("IRON").await.unwrap();
    // Launch price plus the update
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].price, INITIAL_PRICE);
    assert!(approx(history[1].price, 1.23456789));
}

#[tokio::test]
async fn test_replayed_events_leave_read_model_unchanged() {
    let h = harness();
    let ingestor = ingestor(&h);
    let mint = Pubkey::new_unique();
    let events = vec![
        launch(mint, "VOLT", 1_700_000_000),
        price_update(mint, 31_000_000_000, 790_000_000_000_000, 1_700_000_100),
    ];

    for event in &events {
        tokio_test::assert_ok!(ingestor.apply(event).await);
    }
    let companies = h.backend.load_companies().await.unwrap();
    let history = h.backend.price_history("VOLT").await.unwrap();
    let latest = h.backend.latest_price("VOLT").await.unwrap();

    for event in &events {
        tokio_test::assert_ok!(ingestor.apply(event).await);
    }
    assert_eq!(h.backend.load_companies().await.unwrap(), companies);
    assert_eq!(h.backend.price_history("VOLT").await.unwrap(), history);
    assert_eq!(h.backend.latest_price("VOLT").await.unwrap(), latest);
    assert_eq!(h.backend.tokens().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_out_of_order_update_does_not_regress_latest() {
    let h = harness();
    let ingestor = ingestor(&h);
    let mint = Pubkey::new_unique();

    ingestor.apply(&launch(mint, "LATE", 1_700_000_000)).await.unwrap();
    ingestor
        .apply(&price_update(mint, 2_000_000_000, 1_000_000, 1_700_000_200))
        .await
        .unwrap();
    ingestor
        .apply(&price_update(mint, 1_000_000_000, 1_000_000, 1_700_000_100))
        .await
        .unwrap();

    let latest = h.store.latest_price("LATE").await.unwrap().unwrap();
    assert_eq!(latest.updated_at.timestamp(), 1_700_000_200);
    assert!(approx(latest.price, 2.0));
    assert_eq!(h.store.price_history("LATE").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_stream_is_applied_in_order_until_it_ends() {
    let h = harness();
    let ingestor = ingestor(&h);
    let mint = Pubkey::new_unique();

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(price_update(mint, 1_000_000_000, 1_000_000, 1_699_999_000)).unwrap();
    tx.send(launch(mint, "FLOW", 1_700_000_000)).unwrap();
    tx.send(price_update(mint, 1_000_000_000, 1_000_000, 1_700_000_010)).unwrap();
    tx.send(price_update(mint, 1_000_000_000, 1_000_000, 1_700_000_010)).unwrap();
    tx.send(LedgerEvent::Sabotage(SabotageApplied {
        mint,
        perpetrator: Pubkey::new_unique(),
        penalty_bps: 500,
        timestamp: 1_700_000_020,
    }))
    .unwrap();
    drop(tx);

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let stats = ingestor
        .run(LedgerEventStream::from_receiver(rx), shutdown_rx)
        .await;

    assert_eq!(
        stats,
        IngestStats {
            launches: 1,
            price_updates: 1,
            duplicates: 1,
            invalidations: 1,
            // The first update arrived before its launch
            skipped: 1,
            failures: 0,
        }
    );
}

#[tokio::test]
async fn test_spawned_ingestor_counts_backend_outage() {
    let h = harness();
    let ingestor = ingestor(&h);
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ingestor.spawn(LedgerEventStream::from_receiver(rx));

    h.backend.set_available(false);
    tx.send(launch(Pubkey::new_unique(), "DOWN", 1_700_000_000)).unwrap();
    drop(tx);

    for _ in 0..200 {
        if handle.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(handle.is_finished(), "Ingestor should stop when the stream ends");

    let stats = handle.shutdown().await;
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.launches, 0);
    assert!(h.store.is_degraded());
}

#[tokio::test]
async fn test_shutdown_stops_idle_ingestor() {
    let h = harness();
    let (tx, rx) = mpsc::unbounded_channel::<LedgerEvent>();
    let handle = ingestor(&h).spawn(LedgerEventStream::from_receiver(rx));

    let stats = tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("Shutdown should not wait for the next event");
    assert_eq!(stats, IngestStats::default());
    drop(tx);
}

#[tokio::test]
async fn test_speculative_launch_reconciled_by_event() {
    let h = harness();
    let ingestor = ingestor(&h);
    let wallet: Arc<Keypair> = Arc::new(Keypair::new());
    put_protocol_config(&h.ledger, Pubkey::new_unique());

    let client = ProtocolClient::new(common::deriver(), h.ledger.clone(), h.ledger.clone())
        .with_identity(wallet.clone());
    let op = client
        .build_create_business(&CreateBusinessRequest {
            ticker: "MOON".to_string(),
            name: "Moonbase Ventures".to_string(),
            description: "Lunar relay stations.".to_string(),
            sector: Sector::Energy,
        })
        .await
        .expect("Create business should build");

    let row = op.speculative_row().cloned().expect("Launch should carry a speculative row");
    assert_eq!(row.status, RowStatus::Speculative);
    assert_eq!(row.price, INITIAL_PRICE);
    h.store.add_speculative(row.clone());

    let rows = h.store.get_derived_rows().await;
    assert!(rows.iter().any(|r| r.ticker() == "MOON" && r.is_speculative()));

    let mint: Pubkey = row.mint_address.parse().expect("Mint should parse");
    assert_eq!(
        mint,
        common::deriver().mint(&wallet.pubkey(), "MOON").unwrap().address
    );
    ingestor
        .apply(&launch(mint, "MOON", 1_700_000_000))
        .await
        .expect("Launch should apply");

    let rows = h.store.get_derived_rows().await;
    assert!(
        rows.iter().all(|r| r.ticker() != "MOON"),
        "Launch event should reconcile the speculative row"
    );
}

#[tokio::test]
async fn test_confirmed_row_replaces_speculative_row() {
    let h = harness();
    put_business_curve(&h.ledger, "BIO", 30_000_000_000, 800_000_000_000_000);

    let mut pending = h.store.get_derived_rows().await[0].clone();
    pending.price = 1.0;
    h.store.add_speculative(pending);

    let rows = h.store.get_derived_rows().await;
    assert_eq!(rows.len(), 1, "A confirmed row hides the speculative one");
    assert_eq!(rows[0].status, RowStatus::Confirmed);
}

#[tokio::test]
async fn test_unused_backend_is_untouched_by_invalidations() {
    let backend = Arc::new(MemoryBackend::new());
    let ledger = MockLedger::new();
    let poller = marscorp_core::LedgerPoller::new(
        ledger,
        common::deriver(),
        common::seed_wallet(),
        Duration::from_secs(1),
    );
    let store = Arc::new(marscorp_core::ReadModelStore::new(
        backend.clone(),
        poller,
        common::read_model_config(Vec::new()),
    ));
    let ingestor = EventIngestor::new(store);

    let outcome = ingestor
        .apply(&LedgerEvent::Sabotage(SabotageApplied {
            mint: Pubkey::new_unique(),
            perpetrator: Pubkey::new_unique(),
            penalty_bps: 100,
            timestamp: 1_700_000_000,
        }))
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Invalidated);
    assert_eq!(backend.operation_count(), 0);
}
