use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use pks_core::{
    Actor, CoreError, LedgerType, PksChartTemplate, Role, StockLedgerQuery, SupplierTerms,
    SystemAccountKey, TicketFilter, TicketStatus,
};
use pks_finance::FinanceService;
use pks_inventory::WarehouseService;
use pks_store::InMemoryLedgerStore;
use pks_weighbridge::{ApproveTicket, NewTicket, TicketPricing, WeighbridgeService};
use rust_decimal_macros::dec;
use uuid::Uuid;

struct Mill {
    finance: FinanceService<InMemoryLedgerStore>,
    warehouse: WarehouseService<InMemoryLedgerStore>,
    weighbridge: WeighbridgeService<InMemoryLedgerStore>,
    company: Uuid,
}

async fn mill() -> Mill {
    let store = Arc::new(InMemoryLedgerStore::new());
    let finance = FinanceService::new(Arc::clone(&store));
    let company = Uuid::new_v4();
    finance.install_template(company, &PksChartTemplate).await.unwrap();
    finance.validate_system_accounts(company).await.unwrap();
    Mill {
        finance,
        warehouse: WarehouseService::new(Arc::clone(&store)),
        weighbridge: WeighbridgeService::new(store),
        company,
    }
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
}

fn reference_weighing(tbs: Uuid) -> NewTicket {
    NewTicket {
        vehicle_id: Uuid::new_v4(),
        supplier_id: Uuid::new_v4(),
        item_id: tbs,
        tanggal: day(),
        jam_masuk: NaiveTime::from_hms_opt(7, 5, 0).unwrap(),
        jam_keluar: NaiveTime::from_hms_opt(7, 40, 0),
        timbang1: dec!(10000),
        timbang2: dec!(2000),
        pot_percent: dec!(0.02),
    }
}

#[tokio::test]
async fn ticket_flows_into_stock_and_ledger() {
    let mill = mill().await;
    let operator = Actor::new(Uuid::new_v4(), Role::WeighbridgeOperator);
    let manager = Actor::new(Uuid::new_v4(), Role::Manager);
    let tbs = Uuid::new_v4();
    let ramp = Uuid::new_v4();

    let ticket = mill
        .weighbridge
        .bulk_create_pb_harian(&operator, mill.company, vec![reference_weighing(tbs)])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(ticket.no_seri, "20240517-001");
    assert_eq!(ticket.netto1, dec!(8000));
    assert_eq!(ticket.pot_kg, dec!(160));
    assert_eq!(ticket.berat_terima, dec!(7840));

    let priced = mill
        .weighbridge
        .update_pricing(
            &operator,
            ticket.id,
            TicketPricing {
                harga_per_kg: dec!(2500),
                pph_rate: dec!(0.015),
                upah_bongkar_per_kg: dec!(20),
            },
        )
        .await
        .unwrap();
    assert_eq!(priced.total, dec!(19600000));
    assert_eq!(priced.total_pembayaran_supplier, dec!(19149200));

    assert!(matches!(
        mill.weighbridge
            .approve_ticket(&operator, ticket.id, ApproveTicket::default())
            .await,
        Err(CoreError::Forbidden(_))
    ));

    let outcome = mill
        .weighbridge
        .approve_ticket(
            &manager,
            ticket.id,
            ApproveTicket {
                warehouse_id: Some(ramp),
                post: true,
                terms: SupplierTerms::Credit,
            },
        )
        .await
        .unwrap();
    let posting = outcome.posting.unwrap();
    assert_eq!(posting.ticket.status, TicketStatus::Posted);
    assert_eq!(posting.ticket.purchase_je_id, Some(posting.purchase_entry.id));
    assert_eq!(posting.purchase_entry.entry_number, "JTBS/2024/05/0001");
    let unload = posting.unload_entry.unwrap();
    assert_eq!(unload.entry_number, "JUB/2024/05/0001");
    assert_eq!(unload.total_debit(), dec!(156800));

    let stock = mill.warehouse.balance(tbs, ramp, None).await.unwrap();
    assert_eq!(stock.qty_on_hand, dec!(7840));
    assert_eq!(stock.avg_cost, dec!(2500));
    let movements = mill
        .warehouse
        .movements(&StockLedgerQuery {
            ref_id: Some(ticket.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].ledger_type, LedgerType::InWeighbridge);

    // AP nets to the supplier payment once unloading wages are deducted.
    let payable = mill
        .finance
        .system_account(mill.company, SystemAccountKey::AccountsPayableSupplier)
        .await
        .unwrap();
    let ap = mill.finance.account_balance(payable, day(), day()).await.unwrap();
    assert_eq!(ap.closing, dec!(-19149200));

    let pph = mill
        .finance
        .system_account(mill.company, SystemAccountKey::Pph22Payable)
        .await
        .unwrap();
    let withheld = mill.finance.account_balance(pph, day(), day()).await.unwrap();
    assert_eq!(withheld.credit, dec!(294000));

    let trial = mill.finance.trial_balance(mill.company, day()).await.unwrap();
    assert!(trial.is_balanced());
    assert_eq!(mill.warehouse.valuation(Some(ramp)).await.unwrap(), dec!(19600000));

    let again = mill
        .weighbridge
        .post_ticket(&manager, ticket.id, SupplierTerms::Credit)
        .await;
    assert!(matches!(again, Err(CoreError::AlreadyPosted(_))));
    assert_eq!(
        mill.warehouse.balance(tbs, ramp, None).await.unwrap().qty_on_hand,
        dec!(7840)
    );

    let posted = mill
        .weighbridge
        .get_list(&TicketFilter {
            company_id: mill.company,
            from: Some(day()),
            to: Some(day()),
            status: Some(TicketStatus::Posted),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(posted.len(), 1);
    assert_eq!(mill.weighbridge.get_by_id(ticket.id).await.unwrap(), posted[0]);
}

#[tokio::test]
async fn unmapped_inventory_account_leaves_ticket_approved() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let company = Uuid::new_v4();
    let weighbridge = WeighbridgeService::new(Arc::clone(&store));
    let warehouse = WarehouseService::new(store);
    let manager = Actor::new(Uuid::new_v4(), Role::Manager);
    let tbs = Uuid::new_v4();
    let ramp = Uuid::new_v4();

    let ticket = weighbridge
        .bulk_create_pb_harian(&manager, company, vec![reference_weighing(tbs)])
        .await
        .unwrap()
        .remove(0);
    weighbridge
        .update_pricing(
            &manager,
            ticket.id,
            TicketPricing {
                harga_per_kg: dec!(2500),
                pph_rate: dec!(0.015),
                upah_bongkar_per_kg: dec!(20),
            },
        )
        .await
        .unwrap();
    weighbridge
        .approve_ticket(
            &manager,
            ticket.id,
            ApproveTicket {
                warehouse_id: Some(ramp),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let result = weighbridge
        .post_ticket(&manager, ticket.id, SupplierTerms::Credit)
        .await;
    assert!(matches!(result, Err(CoreError::UnmappedSystemKey { .. })));

    let ticket = weighbridge.get_by_id(ticket.id).await.unwrap();
    assert_eq!(ticket.status, TicketStatus::Approved);
    assert_eq!(ticket.purchase_je_id, None);
    assert!(warehouse.balance(tbs, ramp, None).await.unwrap().qty_on_hand.is_zero());
}
