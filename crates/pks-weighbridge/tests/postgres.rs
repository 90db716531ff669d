//! The concurrency scenarios of `concurrency.rs` against a real Postgres,
//! where row locks and the sequence upsert do the serializing.
//!
//! Run with `DATABASE_URL=postgres://... cargo test -- --ignored`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use pks_core::{Actor, CoreError, LedgerType, Role, SourceType};
use pks_finance::FinanceService;
use pks_inventory::{StockMove, WarehouseService};
use pks_platform::{PgLedgerStore, apply_schema};
use pks_weighbridge::{NewTicket, WeighbridgeService};
use rust_decimal_macros::dec;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

// Concurrent `CREATE TABLE IF NOT EXISTS` can still collide in the catalog.
static SCHEMA_APPLIED: Mutex<bool> = Mutex::const_new(false);

async fn store() -> Option<Arc<PgLedgerStore>> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.unwrap();
    let mut applied = SCHEMA_APPLIED.lock().await;
    if !*applied {
        apply_schema(&pool).await.unwrap();
        *applied = true;
    }
    drop(applied);
    Some(Arc::new(PgLedgerStore::new(pool, Duration::from_secs(5))))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs DATABASE_URL"]
async fn postgres_entry_numbers_are_distinct() {
    let Some(store) = store().await else { return };
    let finance = FinanceService::new(store);
    let company = Uuid::new_v4();
    let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let finance = finance.clone();
            tokio::spawn(async move {
                finance
                    .generate_entry_number(company, SourceType::Manual, date)
                    .await
            })
        })
        .collect();

    let mut numbers = BTreeSet::new();
    for task in tasks {
        numbers.insert(task.await.unwrap().unwrap());
    }
    assert_eq!(numbers.len(), 16);
    assert_eq!(numbers.first().map(String::as_str), Some("JU/2024/05/0001"));
    assert_eq!(numbers.last().map(String::as_str), Some("JU/2024/05/0016"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs DATABASE_URL"]
async fn postgres_intake_never_repeats_a_serial() {
    let Some(store) = store().await else { return };
    let weighbridge = WeighbridgeService::new(store);
    let company = Uuid::new_v4();
    let operator = Actor::new(Uuid::new_v4(), Role::WeighbridgeOperator);

    let tasks: Vec<_> = (0..8)
        .map(|hour| {
            let weighbridge = weighbridge.clone();
            tokio::spawn(async move {
                let row = NewTicket {
                    vehicle_id: Uuid::new_v4(),
                    supplier_id: Uuid::new_v4(),
                    item_id: Uuid::new_v4(),
                    tanggal: NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
                    jam_masuk: NaiveTime::from_hms_opt(6 + hour, 0, 0).unwrap(),
                    jam_keluar: None,
                    timbang1: dec!(9000),
                    timbang2: dec!(3000),
                    pot_percent: dec!(0.01),
                };
                weighbridge
                    .bulk_create_pb_harian(&operator, company, vec![row])
                    .await
            })
        })
        .collect();

    let mut serials = BTreeSet::new();
    for task in tasks {
        let created = task.await.unwrap().unwrap();
        serials.insert(created[0].no_seri.clone());
    }
    assert_eq!(serials.len(), 8);
    assert_eq!(serials.last().map(String::as_str), Some("20240517-008"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs DATABASE_URL"]
async fn postgres_outbound_never_oversells() {
    let Some(store) = store().await else { return };
    let warehouse = WarehouseService::new(store);
    let item = Uuid::new_v4();
    let tank = Uuid::new_v4();

    let receipt = StockMove::new(
        item,
        tank,
        Some("T-01"),
        dec!(10),
        LedgerType::InReceipt,
        "goods_receipts",
        Uuid::new_v4(),
    );
    warehouse.record_inbound(receipt, dec!(11000)).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let warehouse = warehouse.clone();
            tokio::spawn(async move {
                let issue = StockMove::new(
                    item,
                    tank,
                    Some("T-01"),
                    dec!(3),
                    LedgerType::OutIssue,
                    "goods_issues",
                    Uuid::new_v4(),
                );
                warehouse.record_outbound(issue).await
            })
        })
        .collect();

    let mut issued = 0;
    let mut refused = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => issued += 1,
            Err(CoreError::InsufficientStock { .. }) => refused += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(issued, 3);
    assert_eq!(refused, 5);

    let balance = warehouse.balance(item, tank, Some("T-01")).await.unwrap();
    assert_eq!(balance.qty_on_hand, dec!(1));
    assert_eq!(balance.avg_cost, dec!(11000));
}
