//! PB Harian intake: weighing, numbering and pricing of DRAFT tickets.

use chrono::{NaiveDate, NaiveTime, Utc};
use pks_core::{
    CoreError, CoreResult, LedgerTx, NumberSeries, TicketFilter, TicketStatus, WeighbridgeTicket,
    compute_weights,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Raw weighing of one truck as captured at the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTicket {
    pub vehicle_id: Uuid,
    pub supplier_id: Uuid,
    pub item_id: Uuid,
    pub tanggal: NaiveDate,
    pub jam_masuk: NaiveTime,
    pub jam_keluar: Option<NaiveTime>,
    /// Bruto, kg.
    pub timbang1: Decimal,
    /// Tara, kg.
    pub timbang2: Decimal,
    /// Sortation deduction as a fraction, `0.02` for 2%.
    #[serde(default)]
    pub pot_percent: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPricing {
    pub harga_per_kg: Decimal,
    #[serde(default)]
    pub pph_rate: Decimal,
    #[serde(default)]
    pub upah_bongkar_per_kg: Decimal,
}

/// Next `YYYYMMDD-NNN` serial for the company's day.
pub async fn generate_no_seri<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    tanggal: NaiveDate,
) -> CoreResult<String> {
    let series = NumberSeries::weighbridge(company_id, tanggal);
    let existing = tx.ticket_numbers_in_window(company_id, &series.window).await?;
    let floor = series.max_suffix(existing.iter().map(String::as_str));
    let sequence = tx.allocate_sequence(&series.scope, floor).await?;
    Ok(series.format(sequence))
}

/// Creates one DRAFT ticket per weighing. Any invalid row fails the batch.
pub async fn bulk_create_pb_harian<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    created_by_id: Uuid,
    rows: Vec<NewTicket>,
) -> CoreResult<Vec<WeighbridgeTicket>> {
    if rows.is_empty() {
        return Err(CoreError::validation("at least one weighing is required"));
    }
    let weights = rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            compute_weights(row.timbang1, row.timbang2, row.pot_percent).map_err(|err| match err {
                CoreError::Validation(message) => {
                    CoreError::validation(format!("row {}: {message}", index + 1))
                }
                other => other,
            })
        })
        .collect::<CoreResult<Vec<_>>>()?;

    let mut created = Vec::with_capacity(rows.len());
    for (row, weights) in rows.into_iter().zip(weights) {
        let no_seri = generate_no_seri(tx, company_id, row.tanggal).await?;
        let ticket = WeighbridgeTicket {
            id: Uuid::new_v4(),
            company_id,
            no_seri,
            vehicle_id: row.vehicle_id,
            supplier_id: row.supplier_id,
            item_id: row.item_id,
            tanggal: row.tanggal,
            jam_masuk: row.jam_masuk,
            jam_keluar: row.jam_keluar,
            timbang1: row.timbang1,
            timbang2: row.timbang2,
            netto1: weights.netto1,
            pot_percent: row.pot_percent,
            pot_kg: weights.pot_kg,
            berat_terima: weights.berat_terima,
            harga_per_kg: Decimal::ZERO,
            pph_rate: Decimal::ZERO,
            upah_bongkar_per_kg: Decimal::ZERO,
            total: Decimal::ZERO,
            total_pph: Decimal::ZERO,
            total_upah_bongkar: Decimal::ZERO,
            total_pembayaran_supplier: Decimal::ZERO,
            status: TicketStatus::Draft,
            warehouse_id: None,
            approved_by_id: None,
            approved_at: None,
            purchase_je_id: None,
            unload_je_id: None,
            created_by_id,
            created_at: Utc::now(),
        };
        tx.insert_ticket(&ticket).await?;
        created.push(ticket);
    }

    info!(
        company_id = %company_id,
        count = created.len(),
        "pb harian tickets created"
    );
    Ok(created)
}

/// Sets the price inputs on a DRAFT ticket and re-derives every total.
pub async fn update_pricing<T: LedgerTx>(
    tx: &mut T,
    ticket_id: Uuid,
    pricing: TicketPricing,
) -> CoreResult<WeighbridgeTicket> {
    let mut ticket = lock(tx, ticket_id).await?;
    match ticket.status {
        TicketStatus::Draft => {}
        TicketStatus::Approved => {
            return Err(CoreError::InvalidState(format!(
                "ticket {} is approved, pricing is frozen",
                ticket.no_seri
            )));
        }
        TicketStatus::Posted => return Err(CoreError::AlreadyPosted(ticket.no_seri)),
    }

    ticket.harga_per_kg = pricing.harga_per_kg;
    ticket.pph_rate = pricing.pph_rate;
    ticket.upah_bongkar_per_kg = pricing.upah_bongkar_per_kg;
    ticket.recompute()?;
    tx.update_ticket(&ticket).await?;
    Ok(ticket)
}

pub async fn get_by_id<T: LedgerTx>(tx: &mut T, ticket_id: Uuid) -> CoreResult<WeighbridgeTicket> {
    tx.find_ticket(ticket_id)
        .await?
        .ok_or_else(|| CoreError::not_found("weighbridge ticket", ticket_id))
}

pub async fn get_list<T: LedgerTx>(
    tx: &mut T,
    filter: &TicketFilter,
) -> CoreResult<Vec<WeighbridgeTicket>> {
    if let (Some(from), Some(to)) = (filter.from, filter.to)
        && from > to
    {
        return Err(CoreError::validation("date range starts after it ends"));
    }
    tx.list_tickets(filter).await
}

pub(crate) async fn lock<T: LedgerTx>(
    tx: &mut T,
    ticket_id: Uuid,
) -> CoreResult<WeighbridgeTicket> {
    tx.lock_ticket(ticket_id)
        .await?
        .ok_or_else(|| CoreError::not_found("weighbridge ticket", ticket_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pks_core::LedgerStore;
    use pks_store::InMemoryLedgerStore;
    use rust_decimal_macros::dec;

    fn weighing(timbang1: Decimal, timbang2: Decimal, pot: Decimal) -> NewTicket {
        NewTicket {
            vehicle_id: Uuid::new_v4(),
            supplier_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            tanggal: NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
            jam_masuk: NaiveTime::from_hms_opt(7, 45, 0).unwrap(),
            jam_keluar: NaiveTime::from_hms_opt(8, 10, 0),
            timbang1,
            timbang2,
            pot_percent: pot,
        }
    }

    #[tokio::test]
    async fn bulk_create_numbers_the_day_sequentially() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let tickets = bulk_create_pb_harian(
            &mut tx,
            company,
            Uuid::new_v4(),
            vec![
                weighing(dec!(10000), dec!(2000), dec!(0.02)),
                weighing(dec!(9000), dec!(3000), dec!(0)),
            ],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(tickets[0].no_seri, "20240517-001");
        assert_eq!(tickets[1].no_seri, "20240517-002");
        assert_eq!(tickets[0].berat_terima, dec!(7840));
        assert_eq!(tickets[1].berat_terima, dec!(6000));
        assert!(tickets.iter().all(|t| t.status == TicketStatus::Draft));

        let mut tx = store.begin().await.unwrap();
        let next = generate_no_seri(&mut tx, company, tickets[0].tanggal).await.unwrap();
        assert_eq!(next, "20240517-003");
    }

    #[tokio::test]
    async fn one_bad_row_rejects_the_batch() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let result = bulk_create_pb_harian(
            &mut tx,
            company,
            Uuid::new_v4(),
            vec![
                weighing(dec!(10000), dec!(2000), dec!(0.02)),
                weighing(dec!(1500), dec!(2000), dec!(0)),
            ],
        )
        .await;
        match result {
            Err(CoreError::Validation(message)) => assert!(message.starts_with("row 2")),
            other => panic!("expected validation error, got {other:?}"),
        }
        let listed = get_list(
            &mut tx,
            &TicketFilter {
                company_id: company,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn empty_truck_and_missing_tara_are_rejected() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        for (index, rows) in [
            vec![weighing(dec!(10000), dec!(10000), dec!(0))],
            vec![
                weighing(dec!(9000), dec!(3000), dec!(0)),
                weighing(dec!(10000), dec!(0), dec!(0.02)),
            ],
        ]
        .into_iter()
        .enumerate()
        {
            let result = bulk_create_pb_harian(&mut tx, Uuid::new_v4(), Uuid::new_v4(), rows).await;
            match result {
                Err(CoreError::Validation(message)) => {
                    assert!(message.starts_with(&format!("row {}", index + 1)))
                }
                other => panic!("expected validation error, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn pricing_recomputes_totals() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let ticket = bulk_create_pb_harian(
            &mut tx,
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![weighing(dec!(10000), dec!(2000), dec!(0.02))],
        )
        .await
        .unwrap()
        .remove(0);
        assert!(!ticket.is_priced());

        let priced = update_pricing(
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
        assert_eq!(priced.total, dec!(19600000));
        assert_eq!(priced.total_pph, dec!(294000));
        assert_eq!(priced.total_upah_bongkar, dec!(156800));
        assert_eq!(priced.total_pembayaran_supplier, dec!(19149200));
        assert_eq!(get_by_id(&mut tx, ticket.id).await.unwrap(), priced);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_supplier() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let rows = vec![
            weighing(dec!(10000), dec!(2000), dec!(0)),
            weighing(dec!(8000), dec!(2500), dec!(0)),
        ];
        let supplier = rows[1].supplier_id;
        bulk_create_pb_harian(&mut tx, company, Uuid::new_v4(), rows).await.unwrap();

        let by_supplier = get_list(
            &mut tx,
            &TicketFilter {
                company_id: company,
                supplier_id: Some(supplier),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(by_supplier.len(), 1);
        assert_eq!(by_supplier[0].netto1, dec!(5500));

        let approved = get_list(
            &mut tx,
            &TicketFilter {
                company_id: company,
                status: Some(TicketStatus::Approved),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(approved.is_empty());
    }
}
