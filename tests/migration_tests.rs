mod common;

use std::path::{Path, PathBuf};

use rust_decimal_macros::dec;

use twap_ingest::error::MigrationError;
use twap_ingest::models::Side;
use twap_ingest::services::csv_emitter::{ParticipantRow, TradeRow};
use twap_ingest::services::retry::RetryPolicy;
use twap_ingest::services::staged_migrator::{MigrationOptions, StagedMigrator};
use twap_ingest::services::trade_store::{MemoryTradeStore, StagingCounts, TradeStore};

use crate::common::write_file;

fn options() -> MigrationOptions {
    MigrationOptions {
        retry: RetryPolicy::none(),
        ..MigrationOptions::default()
    }
}

/// Two trades per day, ids starting at `first_id`, each with a buyer and a seller.
fn write_day(dir: &Path, day: &str, first_id: i64) {
    let mut trades = String::new();
    let mut participants = String::new();
    for id in first_id..first_id + 2 {
        trades.push_str(&format!("{id},BTC,2025-10-06T12:00:00.123,100,2,0xh{id},\\N\n"));
        participants.push_str(&format!("{id},0xa,B,0,{id},7,\\N\n"));
        participants.push_str(&format!("{id},0xb,A,1.5,{id},\\N,\"\"\n"));
    }
    write_file(&dir.join(format!("trades_{day}.csv")), &trades);
    write_file(&dir.join(format!("trade_participants_{day}.csv")), &participants);
}

fn existing_production() -> MemoryTradeStore {
    let trade = TradeRow {
        id: 5,
        coin: "ETH".to_string(),
        time: "2025-10-01T00:00:00".to_string(),
        price: dec!(10),
        size: dec!(1),
        hash: "0xold".to_string(),
        trade_dir_override: None,
    };
    let participant = ParticipantRow {
        trade_id: 5,
        user_address: "0xa".to_string(),
        side: Side::Bid,
        start_pos: dec!(0),
        order_id: 1,
        strategy_id: Some(1),
        client_order_id: None,
    };
    MemoryTradeStore::with_production(vec![trade], vec![participant])
}

fn csv_root() -> (tempfile::TempDir, Vec<PathBuf>) {
    let root = tempfile::tempdir().unwrap();
    let dirs = vec![root.path().to_path_buf()];
    (root, dirs)
}

#[tokio::test]
async fn full_run_moves_staging_into_production() {
    let (root, dirs) = csv_root();
    write_day(&root.path().join("node_trades"), "20251006", 6);
    write_day(&root.path().join("node_fills_by_block"), "20251007", 8);
    let store = existing_production();

    let report = StagedMigrator::new(&store, options()).run(&dirs).await.unwrap();

    assert_eq!(report.partitions.len(), 2);
    assert_eq!(report.loaded, StagingCounts { trades: 4, participants: 8 });
    assert_eq!(report.production_max_before, Some(5));
    assert_eq!(report.migrated, Some(StagingCounts { trades: 4, participants: 8 }));
    assert_eq!(report.sequence, Some(9));

    let production = store.production_snapshot();
    let ids: Vec<i64> = production.trades.iter().map(|t| t.id).collect();
    assert_eq!(ids, [5, 6, 7, 8, 9]);
    assert_eq!(production.participants.len(), 9);
    assert_eq!(production.participants[2].client_order_id.as_deref(), Some(""));
    assert!(store.staging_counts().await.unwrap().is_empty());
}

#[tokio::test]
async fn overlapping_ids_abort_before_production_is_touched() {
    let (root, dirs) = csv_root();
    write_day(root.path(), "20251006", 4);
    let store = existing_production();
    let before = store.production_snapshot();

    let err = StagedMigrator::new(&store, options()).run(&dirs).await.unwrap_err();

    match &err {
        MigrationError::IdConflict {
            staging_min,
            production_max,
            next_safe_id,
        } => {
            assert_eq!((*staging_min, *production_max, *next_safe_id), (4, 5, 6));
        }
        other => panic!("expected id conflict, got {other}"),
    }
    assert!(err.to_string().contains("--start-id=6"));
    assert_eq!(store.production_snapshot(), before);
    // staging is kept for inspection
    assert_eq!(store.staging_counts().await.unwrap().trades, 2);
}

#[tokio::test]
async fn staging_only_then_migrate_only() {
    let (root, dirs) = csv_root();
    write_day(root.path(), "20251006", 1);
    let store = MemoryTradeStore::new();

    let staged = StagedMigrator::new(
        &store,
        MigrationOptions {
            staging_only: true,
            ..options()
        },
    )
    .run(&dirs)
    .await
    .unwrap();
    assert!(staged.stopped_after_staging);
    assert!(store.production_snapshot().trades.is_empty());

    let migrated = StagedMigrator::new(
        &store,
        MigrationOptions {
            migrate_only: true,
            ..options()
        },
    )
    .run(&[])
    .await
    .unwrap();
    assert!(migrated.partitions.is_empty());
    assert_eq!(migrated.migrated.map(|m| m.trades), Some(2));
    assert_eq!(store.production_snapshot().sequence, 2);
}

#[tokio::test]
async fn failed_migration_keeps_staging_for_a_retry() {
    let (root, dirs) = csv_root();
    write_day(root.path(), "20251006", 6);
    let store = existing_production();
    let before = store.production_snapshot();
    store.fail_next_migrate();

    let err = StagedMigrator::new(&store, options()).run(&dirs).await.unwrap_err();
    assert!(matches!(err, MigrationError::Migrate(_)));
    assert_eq!(store.production_snapshot(), before);
    assert_eq!(store.staging_counts().await.unwrap().trades, 2);

    let retried = StagedMigrator::new(
        &store,
        MigrationOptions {
            migrate_only: true,
            ..options()
        },
    )
    .run(&dirs)
    .await
    .unwrap();
    assert_eq!(retried.migrated.map(|m| m.trades), Some(2));
    assert_eq!(store.production_snapshot().trades.len(), 3);
}

#[tokio::test]
async fn non_empty_staging_needs_reset_or_resume_date() {
    let (root, dirs) = csv_root();
    write_day(root.path(), "20251005", 1);
    write_day(root.path(), "20251006", 3);
    let store = MemoryTradeStore::new();

    // first attempt stages everything, then stops
    StagedMigrator::new(
        &store,
        MigrationOptions {
            staging_only: true,
            ..options()
        },
    )
    .run(&dirs)
    .await
    .unwrap();

    let err = StagedMigrator::new(&store, options()).run(&dirs).await.unwrap_err();
    assert!(matches!(err, MigrationError::StagingNotEmpty { trades: 4, .. }));

    // resuming re-appends the days at or after the date, which verify then flags
    let err = StagedMigrator::new(
        &store,
        MigrationOptions {
            start_date: Some("20251006".parse().unwrap()),
            ..options()
        },
    )
    .run(&dirs)
    .await
    .unwrap_err();
    assert!(matches!(err, MigrationError::StagingAnomalies(_)));

    let report = StagedMigrator::new(
        &store,
        MigrationOptions {
            reset_staging: true,
            ..options()
        },
    )
    .run(&dirs)
    .await
    .unwrap();
    assert_eq!(report.loaded.trades, 4);
    assert_eq!(store.production_snapshot().trades.len(), 4);
}

#[tokio::test]
async fn orphan_participants_fail_verification() {
    let (root, dirs) = csv_root();
    write_file(
        &root.path().join("trades_20251006.csv"),
        "1,BTC,2025-10-06T12:00:00,1,1,0xh,\\N\n",
    );
    write_file(
        &root.path().join("trade_participants_20251006.csv"),
        "1,0xa,B,0,1,7,\\N\n1,0xb,A,0,2,\\N,\\N\n2,0xc,B,0,3,7,\\N\n",
    );
    let store = MemoryTradeStore::new();

    let err = StagedMigrator::new(&store, options()).run(&dirs).await.unwrap_err();
    match err {
        MigrationError::StagingAnomalies(detail) => assert!(detail.contains("1 orphan participants")),
        other => panic!("expected anomalies, got {other}"),
    }
    assert!(store.production_snapshot().trades.is_empty());
}

#[tokio::test]
async fn oversized_staged_values_fail_verification_not_the_load() {
    let (root, dirs) = csv_root();
    let long_override = "x".repeat(40);
    write_file(
        &root.path().join("trades_20251006.csv"),
        &format!("1,BTC,2025-10-06T12:00:00,1,1,0xh,{long_override}\n"),
    );
    write_file(
        &root.path().join("trade_participants_20251006.csv"),
        "1,0xa,B,0,1,7,\\N\n1,0xb,A,0,2,\\N,\\N\n",
    );
    let store = MemoryTradeStore::new();

    let err = StagedMigrator::new(&store, options()).run(&dirs).await.unwrap_err();
    match err {
        MigrationError::StagingAnomalies(detail) => assert!(detail.contains("1 rows with oversized fields")),
        other => panic!("expected anomalies, got {other}"),
    }
    assert_eq!(store.staging_counts().await.unwrap().trades, 1);
    assert!(store.production_snapshot().trades.is_empty());
}

#[tokio::test]
async fn malformed_day_fails_stage_load_with_its_key() {
    let (root, dirs) = csv_root();
    write_day(root.path(), "20251005", 1);
    write_file(&root.path().join("trades_20251006.csv"), "3,BTC,not-enough-columns\n");
    write_file(&root.path().join("trade_participants_20251006.csv"), "");
    let store = MemoryTradeStore::new();

    let err = StagedMigrator::new(&store, options()).run(&dirs).await.unwrap_err();
    assert!(err.to_string().contains("resume with --start-date=20251006"));
    // the earlier day stays staged, the failed day left nothing behind
    assert_eq!(store.staging_counts().await.unwrap().trades, 2);
}

#[tokio::test]
async fn empty_csv_dir_is_reported() {
    let (_root, dirs) = csv_root();
    let store = MemoryTradeStore::new();

    let err = StagedMigrator::new(&store, options()).run(&dirs).await.unwrap_err();
    assert!(matches!(err, MigrationError::NothingToImport(_)));
}

#[tokio::test]
async fn preview_leaderboard_ranks_migrated_rows() {
    let (root, dirs) = csv_root();
    write_day(root.path(), "20251006", 6);
    let store = existing_production();
    StagedMigrator::new(&store, options()).run(&dirs).await.unwrap();

    let top = store.preview_leaderboard(20);
    let ranked: Vec<(i64, &str)> = top.iter().map(|e| (e.rank, e.user_address.as_str())).collect();
    assert_eq!(ranked, [(1, "0xa"), (2, "0xb")]);
    assert_eq!(top[0].total_volume, dec!(410));
    assert_eq!(top[0].total_trades, 3);
    assert_eq!(top[0].unique_strategies, 2);
    assert_eq!(top[1].unique_strategies, 0);
}
