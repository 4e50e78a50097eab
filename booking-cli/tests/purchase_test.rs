use std::path::PathBuf;
use std::sync::Arc;

use booking_cli::app::{self, PurchaseOutcome, PurchaseRequest, Session, build_registry};
use booking_cli::config::{SessionConfig, SettlementConfig, SettlementMode};
use booking_core::db::DbConfig;
use booking_core::BookingRepository;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

async fn sqlite_repo() -> Arc<dyn BookingRepository> {
    let config = DbConfig {
        backend: "sqlite".to_string(),
        connection_string: ":memory:".to_string(),
    };
    Arc::from(
        build_registry()
            .open(&config)
            .await
            .expect("failed to open seeded database"),
    )
}

async fn open(
    repo: Arc<dyn BookingRepository>,
    mode: SettlementMode,
) -> Session {
    Session::open(
        repo,
        &SessionConfig::default(),
        &SettlementConfig { mode, delay_ms: 0 },
    )
    .await
    .expect("failed to open session")
}

fn vip_pair() -> PurchaseRequest {
    PurchaseRequest {
        item_id: 3,
        variant: Some("vip".to_string()),
        quantity: Some("2".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn ledger_purchase_against_seeded_account() {
    let repo = sqlite_repo().await;
    let session = open(repo.clone(), SettlementMode::Ledger).await;
    assert_eq!(session.balance().balance(), dec!(75000.00));

    let report = app::run_purchase(&session, &vip_pair(), |summary| {
        assert_eq!(summary.total, dec!(472.50));
        assert_eq!(summary.projected_balance, dec!(74527.50));
        true
    })
    .await
    .unwrap();

    let PurchaseOutcome::Settled { receipt, remaining } = report.outcome else {
        panic!("expected settlement, got {:?}", report.outcome);
    };
    assert_eq!(remaining, dec!(74527.50));

    let history = session.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].intent_id, receipt.intent_id);
    assert_eq!(history[0].total, dec!(472.50));
    assert_eq!(repo.get_account(1).await.unwrap().balance, dec!(74527.50));
}

#[tokio::test]
async fn simulated_purchase_leaves_database_alone() {
    let repo = sqlite_repo().await;
    let session = open(repo.clone(), SettlementMode::Simulated).await;

    let report = app::run_purchase(&session, &vip_pair(), |_| true).await.unwrap();

    assert!(matches!(report.outcome, PurchaseOutcome::Settled { .. }));
    assert_eq!(session.balance().balance(), dec!(74527.50));
    assert!(session.history().await.unwrap().is_empty());
    assert_eq!(repo.get_account(1).await.unwrap().balance, dec!(75000.00));
}

#[tokio::test]
async fn top_up_unblocks_a_celebrity_booking() {
    let repo = sqlite_repo().await;
    let mut session = open(repo, SettlementMode::Ledger).await;
    let request = PurchaseRequest {
        item_id: 1,
        ..Default::default()
    };

    // 50,000 + 2,500 fee against 75,000: affordable once, not twice.
    let first = app::run_purchase(&session, &request, |_| true).await.unwrap();
    assert!(matches!(first.outcome, PurchaseOutcome::Settled { .. }));

    let second = app::run_purchase(&session, &request, |_| true).await.unwrap();
    let PurchaseOutcome::Blocked(top_up) = second.outcome else {
        panic!("expected the gate to block, got {:?}", second.outcome);
    };
    assert_eq!(top_up.shortfall, dec!(30000.00));

    session.top_up(top_up.shortfall).await.unwrap();
    let third = app::run_purchase(&session, &request, |_| true).await.unwrap();
    assert!(matches!(third.outcome, PurchaseOutcome::Settled { .. }));
    assert_eq!(session.balance().balance(), dec!(0.00));
    assert_eq!(session.history().await.unwrap().len(), 2);
}

#[tokio::test]
async fn catalog_import_feeds_the_memory_backend() {
    let config = DbConfig {
        backend: "memory".to_string(),
        connection_string: String::new(),
    };
    let repo: Arc<dyn BookingRepository> =
        Arc::from(build_registry().open(&config).await.unwrap());
    let csv = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../booking-data/test-data/catalog.csv");

    let loaded = app::import_catalog(repo.as_ref(), &csv).await.unwrap();

    assert_eq!(loaded, 5);
    let items = repo.list_items(None).await.unwrap();
    assert_eq!(items.len(), 5);
    assert!(app::render_catalog(&items).contains("Harbor Lights"));
}
