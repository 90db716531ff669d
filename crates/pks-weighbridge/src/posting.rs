//! Approval and posting of weighbridge tickets.
//!
//! Posting receives the accepted TBS weight into stock at the ticket price
//! and books the purchase and unloading entries in the caller's transaction.
//! The journal ids persisted on the ticket make a second post detectable.

use chrono::Utc;
use pks_core::{
    Actor, CoreError, CoreResult, JournalEntry, LedgerTx, LedgerType, SourceType,
    StockLedgerEntry, SupplierTerms, SystemAccountKey, TicketStatus, WeighbridgeTicket,
};
use pks_finance::{JournalLineInput, NewJournalEntry, journal, system_accounts};
use pks_inventory::{StockMove, ledger};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::tickets;

/// `ref_table` of stock movements created by tickets.
pub const TICKET_REF_TABLE: &str = "weighbridge_tickets";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveTicket {
    /// Where the TBS is received; may also be set on an earlier approval.
    pub warehouse_id: Option<Uuid>,
    /// Post right after approving, in the same transaction.
    #[serde(default)]
    pub post: bool,
    #[serde(default)]
    pub terms: SupplierTerms,
}

/// Everything a successful post wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPosting {
    pub ticket: WeighbridgeTicket,
    pub stock_entry: StockLedgerEntry,
    pub purchase_entry: JournalEntry,
    pub unload_entry: Option<JournalEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub ticket: WeighbridgeTicket,
    pub posting: Option<TicketPosting>,
}

pub async fn approve_ticket<T: LedgerTx>(
    tx: &mut T,
    ticket_id: Uuid,
    actor: &Actor,
    approval: ApproveTicket,
) -> CoreResult<ApprovalOutcome> {
    actor.ensure_approver("approve weighbridge tickets")?;
    let mut ticket = tickets::lock(tx, ticket_id).await?;
    match ticket.status {
        TicketStatus::Draft => {}
        TicketStatus::Approved => {
            return Err(CoreError::InvalidState(format!(
                "ticket {} is already approved",
                ticket.no_seri
            )));
        }
        TicketStatus::Posted => return Err(CoreError::AlreadyPosted(ticket.no_seri)),
    }
    if !ticket.is_priced() {
        return Err(CoreError::validation(format!(
            "ticket {} has no price per kg",
            ticket.no_seri
        )));
    }
    if ticket.berat_terima <= Decimal::ZERO {
        return Err(CoreError::validation(format!(
            "ticket {} has no received weight",
            ticket.no_seri
        )));
    }

    if approval.warehouse_id.is_some() {
        ticket.warehouse_id = approval.warehouse_id;
    }
    ticket.status = TicketStatus::Approved;
    ticket.approved_by_id = Some(actor.user_id);
    ticket.approved_at = Some(Utc::now());
    tx.update_ticket(&ticket).await?;
    info!(
        ticket_id = %ticket.id,
        no_seri = %ticket.no_seri,
        approved_by = %actor.user_id,
        "weighbridge ticket approved"
    );

    if !approval.post {
        return Ok(ApprovalOutcome {
            ticket,
            posting: None,
        });
    }
    let posting = post_ticket(tx, ticket.id, actor.user_id, approval.terms).await?;
    Ok(ApprovalOutcome {
        ticket: posting.ticket.clone(),
        posting: Some(posting),
    })
}

/// Receives the ticket into stock and books its journal entries.
///
/// Purchase: debit `INVENTORY_TBS` for the total, credit `PPH22_PAYABLE` for
/// the withholding and the settlement account for the rest. Unloading, when
/// charged: debit the settlement account, credit `UNLOAD_WAGES_PAYABLE`.
pub async fn post_ticket<T: LedgerTx>(
    tx: &mut T,
    ticket_id: Uuid,
    posted_by_id: Uuid,
    terms: SupplierTerms,
) -> CoreResult<TicketPosting> {
    let mut ticket = tickets::lock(tx, ticket_id).await?;
    if ticket.status == TicketStatus::Posted || ticket.purchase_je_id.is_some() {
        warn!(
            ticket_id = %ticket.id,
            no_seri = %ticket.no_seri,
            "weighbridge ticket already posted"
        );
        return Err(CoreError::AlreadyPosted(ticket.no_seri));
    }
    if ticket.status != TicketStatus::Approved {
        return Err(CoreError::InvalidState(format!(
            "ticket {} must be approved before posting",
            ticket.no_seri
        )));
    }
    let warehouse_id = ticket.warehouse_id.ok_or_else(|| {
        CoreError::validation(format!("ticket {} has no receiving warehouse", ticket.no_seri))
    })?;

    let company_id = ticket.company_id;
    let inventory = system_accounts::get(tx, company_id, SystemAccountKey::InventoryTbs).await?;
    let pph = system_accounts::get(tx, company_id, SystemAccountKey::Pph22Payable).await?;
    let settlement = system_accounts::get(tx, company_id, settlement_key(terms)).await?;
    let unload_payable = if ticket.total_upah_bongkar > Decimal::ZERO {
        let key = SystemAccountKey::UnloadWagesPayable;
        Some(system_accounts::get(tx, company_id, key).await?)
    } else {
        None
    };

    let movement = StockMove::new(
        ticket.item_id,
        warehouse_id,
        None,
        ticket.berat_terima,
        LedgerType::InWeighbridge,
        TICKET_REF_TABLE,
        ticket.id,
    )
    .with_note(Some(format!("PB {}", ticket.no_seri)));
    let stock_entry = ledger::record_inbound(tx, movement, ticket.harga_per_kg).await?;

    let mut purchase_lines = vec![
        JournalLineInput::debit(inventory, ticket.total)
            .with_item(ticket.item_id, warehouse_id)
            .with_description(format!("TBS {} kg", ticket.berat_terima)),
    ];
    if ticket.total_pph > Decimal::ZERO {
        purchase_lines.push(
            JournalLineInput::credit(pph, ticket.total_pph).with_description("PPh 22"),
        );
    }
    purchase_lines.push(JournalLineInput::credit(settlement, ticket.total - ticket.total_pph));
    let purchase_entry = journal::post(
        tx,
        NewJournalEntry {
            company_id: ticket.company_id,
            date: ticket.tanggal,
            source_type: SourceType::WeighbridgePurchase,
            source_id: Some(ticket.id),
            memo: Some(format!("Pembelian TBS {}", ticket.no_seri)),
            lines: purchase_lines,
            created_by_id: posted_by_id,
        },
    )
    .await?;

    let unload_entry = match unload_payable {
        Some(payable) => Some(
            journal::post(
                tx,
                NewJournalEntry {
                    company_id: ticket.company_id,
                    date: ticket.tanggal,
                    source_type: SourceType::WeighbridgeUnload,
                    source_id: Some(ticket.id),
                    memo: Some(format!("Upah bongkar {}", ticket.no_seri)),
                    lines: vec![
                        JournalLineInput::debit(settlement, ticket.total_upah_bongkar),
                        JournalLineInput::credit(payable, ticket.total_upah_bongkar),
                    ],
                    created_by_id: posted_by_id,
                },
            )
            .await?,
        ),
        None => None,
    };

    ticket.status = TicketStatus::Posted;
    ticket.purchase_je_id = Some(purchase_entry.id);
    ticket.unload_je_id = unload_entry.as_ref().map(|entry| entry.id);
    tx.update_ticket(&ticket).await?;

    info!(
        company_id = %ticket.company_id,
        ticket_id = %ticket.id,
        no_seri = %ticket.no_seri,
        berat_terima = %ticket.berat_terima,
        total = %ticket.total,
        purchase_entry = %purchase_entry.entry_number,
        "weighbridge ticket posted"
    );
    Ok(TicketPosting {
        ticket,
        stock_entry,
        purchase_entry,
        unload_entry,
    })
}

fn settlement_key(terms: SupplierTerms) -> SystemAccountKey {
    match terms {
        SupplierTerms::Credit => SystemAccountKey::AccountsPayableSupplier,
        SupplierTerms::Cash => SystemAccountKey::CashBank,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use pks_core::{LedgerStore, PksChartTemplate, Role, StockLedgerQuery};
    use pks_finance::system_accounts::install_template;
    use pks_store::InMemoryLedgerStore;
    use rust_decimal_macros::dec;

    use crate::tickets::{NewTicket, TicketPricing, bulk_create_pb_harian, update_pricing};

    struct Fixture {
        store: InMemoryLedgerStore,
        company: Uuid,
        warehouse: Uuid,
        manager: Actor,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        install_template(&mut tx, company, &PksChartTemplate).await.unwrap();
        tx.commit().await.unwrap();
        Fixture {
            store,
            company,
            warehouse: Uuid::new_v4(),
            manager: Actor::new(Uuid::new_v4(), Role::Manager),
        }
    }

    async fn priced_ticket<T: LedgerTx>(
        tx: &mut T,
        company: Uuid,
        upah_bongkar_per_kg: Decimal,
    ) -> WeighbridgeTicket {
        let row = NewTicket {
            vehicle_id: Uuid::new_v4(),
            supplier_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            tanggal: NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
            jam_masuk: NaiveTime::from_hms_opt(6, 30, 0).unwrap(),
            jam_keluar: None,
            timbang1: dec!(10000),
            timbang2: dec!(2000),
            pot_percent: dec!(0.02),
        };
        let ticket = bulk_create_pb_harian(tx, company, Uuid::new_v4(), vec![row])
            .await
            .unwrap()
            .remove(0);
        update_pricing(
            tx,
            ticket.id,
            TicketPricing {
                harga_per_kg: dec!(2500),
                pph_rate: dec!(0.015),
                upah_bongkar_per_kg,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn approval_requires_manager_and_price() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();
        let unpriced = bulk_create_pb_harian(
            &mut tx,
            fx.company,
            Uuid::new_v4(),
            vec![NewTicket {
                vehicle_id: Uuid::new_v4(),
                supplier_id: Uuid::new_v4(),
                item_id: Uuid::new_v4(),
                tanggal: NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
                jam_masuk: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                jam_keluar: None,
                timbang1: dec!(5000),
                timbang2: dec!(1500),
                pot_percent: Decimal::ZERO,
            }],
        )
        .await
        .unwrap()
        .remove(0);

        let operator = Actor::new(Uuid::new_v4(), Role::WeighbridgeOperator);
        assert!(matches!(
            approve_ticket(&mut tx, unpriced.id, &operator, ApproveTicket::default()).await,
            Err(CoreError::Forbidden(_))
        ));
        assert!(matches!(
            approve_ticket(&mut tx, unpriced.id, &fx.manager, ApproveTicket::default()).await,
            Err(CoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn ticket_without_received_weight_stays_draft() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();
        // 0.01 kg netto is fully consumed by the 60% potongan after rounding.
        let ticket = bulk_create_pb_harian(
            &mut tx,
            fx.company,
            Uuid::new_v4(),
            vec![NewTicket {
                vehicle_id: Uuid::new_v4(),
                supplier_id: Uuid::new_v4(),
                item_id: Uuid::new_v4(),
                tanggal: NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
                jam_masuk: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                jam_keluar: None,
                timbang1: dec!(2000.01),
                timbang2: dec!(2000),
                pot_percent: dec!(0.6),
            }],
        )
        .await
        .unwrap()
        .remove(0);
        assert_eq!(ticket.berat_terima, Decimal::ZERO);
        update_pricing(
            &mut tx,
            ticket.id,
            TicketPricing {
                harga_per_kg: dec!(2500),
                pph_rate: dec!(0.015),
                upah_bongkar_per_kg: dec!(20),
            },
        )
        .await
        .unwrap();

        let approval = ApproveTicket {
            warehouse_id: Some(fx.warehouse),
            post: true,
            terms: SupplierTerms::Credit,
        };
        assert!(matches!(
            approve_ticket(&mut tx, ticket.id, &fx.manager, approval).await,
            Err(CoreError::Validation(_))
        ));
        let reloaded = tickets::get_by_id(&mut tx, ticket.id).await.unwrap();
        assert_eq!(reloaded.status, TicketStatus::Draft);
    }

    #[tokio::test]
    async fn approved_pricing_is_frozen() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();
        let ticket = priced_ticket(&mut tx, fx.company, dec!(20)).await;
        let outcome = approve_ticket(&mut tx, ticket.id, &fx.manager, ApproveTicket::default())
            .await
            .unwrap();
        assert_eq!(outcome.ticket.status, TicketStatus::Approved);
        assert!(outcome.posting.is_none());

        let result = update_pricing(
            &mut tx,
            ticket.id,
            TicketPricing {
                harga_per_kg: dec!(2600),
                pph_rate: dec!(0.015),
                upah_bongkar_per_kg: dec!(20),
            },
        )
        .await;
        assert!(matches!(result, Err(CoreError::InvalidState(_))));
    }

    #[tokio::test]
    async fn posting_needs_a_receiving_warehouse() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();
        let ticket = priced_ticket(&mut tx, fx.company, dec!(20)).await;
        approve_ticket(&mut tx, ticket.id, &fx.manager, ApproveTicket::default())
            .await
            .unwrap();

        let result =
            post_ticket(&mut tx, ticket.id, fx.manager.user_id, SupplierTerms::Credit).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn draft_ticket_cannot_be_posted() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();
        let ticket = priced_ticket(&mut tx, fx.company, dec!(20)).await;
        let result =
            post_ticket(&mut tx, ticket.id, fx.manager.user_id, SupplierTerms::Credit).await;
        assert!(matches!(result, Err(CoreError::InvalidState(_))));
    }

    #[tokio::test]
    async fn cash_purchase_without_unloading_books_one_entry() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();
        let ticket = priced_ticket(&mut tx, fx.company, Decimal::ZERO).await;
        let cash = system_accounts::get(&mut tx, fx.company, SystemAccountKey::CashBank)
            .await
            .unwrap();

        let outcome = approve_ticket(
            &mut tx,
            ticket.id,
            &fx.manager,
            ApproveTicket {
                warehouse_id: Some(fx.warehouse),
                post: true,
                terms: SupplierTerms::Cash,
            },
        )
        .await
        .unwrap();
        let posting = outcome.posting.unwrap();
        assert_eq!(outcome.ticket.status, TicketStatus::Posted);
        assert!(posting.unload_entry.is_none());
        assert_eq!(posting.ticket.unload_je_id, None);
        assert_eq!(posting.purchase_entry.entry_number, "JTBS/2024/05/0001");

        let cash_line = posting
            .purchase_entry
            .lines
            .iter()
            .find(|line| line.account_id == cash)
            .unwrap();
        assert_eq!(cash_line.credit, dec!(19306000));
    }

    #[tokio::test]
    async fn second_post_is_rejected_without_side_effects() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();
        let ticket = priced_ticket(&mut tx, fx.company, dec!(20)).await;
        approve_ticket(
            &mut tx,
            ticket.id,
            &fx.manager,
            ApproveTicket {
                warehouse_id: Some(fx.warehouse),
                post: true,
                terms: SupplierTerms::Credit,
            },
        )
        .await
        .unwrap();

        let again =
            post_ticket(&mut tx, ticket.id, fx.manager.user_id, SupplierTerms::Credit).await;
        assert!(matches!(again, Err(CoreError::AlreadyPosted(_))));

        let movements = ledger::movements(
            &mut tx,
            &StockLedgerQuery {
                ref_id: Some(ticket.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(movements.len(), 1);
        let purchase = journal::list_by_source(&mut tx, SourceType::WeighbridgePurchase, ticket.id)
            .await
            .unwrap();
        let unload = journal::list_by_source(&mut tx, SourceType::WeighbridgeUnload, ticket.id)
            .await
            .unwrap();
        assert_eq!(purchase.len(), 1);
        assert_eq!(unload.len(), 1);
    }
}
