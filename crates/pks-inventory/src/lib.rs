//! Per-bin moving-average stock ledger and the warehouse documents that post
//! through it.
//!
//! A document moves stock and books its journal entry in the same
//! transaction: either both land or neither does.

pub mod ledger;
pub mod warehouse;

use std::sync::Arc;

use pks_core::{
    Actor, CoreResult, ItemRequest, LedgerStore, LedgerTx, StockBalance, StockDocument,
    StockLedgerEntry, StockLedgerQuery,
};
use rust_decimal::Decimal;
use uuid::Uuid;

pub use ledger::{InventoryPosition, StockMove};
pub use warehouse::{
    CountLineInput, FulfilItemRequest, GoodsIssueInput, GoodsReceiptInput, IssueLineInput,
    ItemRequestLineInput, LoanIssueInput, LoanLineInput, LoanReturnInput, LoanReturnLineInput,
    NewItemRequest, ReceiptLineInput, StockCountInput, ensure_warehouse,
};

/// Stock ledger and warehouse documents, one transaction per call.
pub struct WarehouseService<S> {
    store: Arc<S>,
}

impl<S> Clone for WarehouseService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> WarehouseService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn balance(
        &self,
        item_id: Uuid,
        warehouse_id: Uuid,
        bin_id: Option<&str>,
    ) -> CoreResult<StockBalance> {
        let mut tx = self.store.begin().await?;
        ledger::get_balance(&mut tx, item_id, warehouse_id, bin_id).await
    }

    pub async fn record_inbound(
        &self,
        movement: StockMove,
        unit_cost: Decimal,
    ) -> CoreResult<StockLedgerEntry> {
        let mut tx = self.store.begin().await?;
        let entry = ledger::record_inbound(&mut tx, movement, unit_cost).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn record_outbound(&self, movement: StockMove) -> CoreResult<StockLedgerEntry> {
        let mut tx = self.store.begin().await?;
        let entry = ledger::record_outbound(&mut tx, movement).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn record_count_adjustment(
        &self,
        movement: StockMove,
        counted_qty: Decimal,
    ) -> CoreResult<Option<StockLedgerEntry>> {
        let mut tx = self.store.begin().await?;
        let entry = ledger::record_count_adjustment(
            &mut tx,
            movement.item_id,
            movement.warehouse_id,
            Some(&movement.bin_id),
            counted_qty,
            &movement.ref_table,
            movement.ref_id,
            movement.note,
        )
        .await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn movements(&self, query: &StockLedgerQuery) -> CoreResult<Vec<StockLedgerEntry>> {
        let mut tx = self.store.begin().await?;
        ledger::movements(&mut tx, query).await
    }

    pub async fn valuation(&self, warehouse_id: Option<Uuid>) -> CoreResult<Decimal> {
        let mut tx = self.store.begin().await?;
        ledger::valuation(&mut tx, warehouse_id).await
    }

    pub async fn goods_receipt(
        &self,
        actor: &Actor,
        mut input: GoodsReceiptInput,
    ) -> CoreResult<StockDocument> {
        ensure_warehouse(actor, "receive goods")?;
        input.created_by_id = actor.user_id;

        let mut tx = self.store.begin().await?;
        let document = warehouse::create_goods_receipt(&mut tx, input).await?;
        tx.commit().await?;
        Ok(document)
    }

    pub async fn goods_issue(
        &self,
        actor: &Actor,
        mut input: GoodsIssueInput,
    ) -> CoreResult<StockDocument> {
        ensure_warehouse(actor, "issue goods")?;
        input.created_by_id = actor.user_id;

        let mut tx = self.store.begin().await?;
        let document = warehouse::create_goods_issue(&mut tx, input).await?;
        tx.commit().await?;
        Ok(document)
    }

    pub async fn loan_issue(
        &self,
        actor: &Actor,
        mut input: LoanIssueInput,
    ) -> CoreResult<StockDocument> {
        ensure_warehouse(actor, "lend goods")?;
        input.created_by_id = actor.user_id;

        let mut tx = self.store.begin().await?;
        let document = warehouse::create_loan_issue(&mut tx, input).await?;
        tx.commit().await?;
        Ok(document)
    }

    pub async fn loan_return(
        &self,
        actor: &Actor,
        mut input: LoanReturnInput,
    ) -> CoreResult<StockDocument> {
        ensure_warehouse(actor, "take back loaned goods")?;
        input.created_by_id = actor.user_id;

        let mut tx = self.store.begin().await?;
        let document = warehouse::create_loan_return(&mut tx, input).await?;
        tx.commit().await?;
        Ok(document)
    }

    pub async fn stock_adjustment(
        &self,
        actor: &Actor,
        mut input: StockCountInput,
    ) -> CoreResult<StockDocument> {
        actor.ensure_approver("post stock counts")?;
        input.created_by_id = actor.user_id;

        let mut tx = self.store.begin().await?;
        let document = warehouse::create_stock_adjustment(&mut tx, input).await?;
        tx.commit().await?;
        Ok(document)
    }

    /// Documents are never deleted; cancelling reverses the stock and voids the entry.
    pub async fn cancel_document(
        &self,
        actor: &Actor,
        document_id: Uuid,
    ) -> CoreResult<StockDocument> {
        actor.ensure_approver("cancel warehouse documents")?;

        let mut tx = self.store.begin().await?;
        let document = warehouse::cancel_document(&mut tx, document_id).await?;
        tx.commit().await?;
        Ok(document)
    }

    pub async fn document(&self, document_id: Uuid) -> CoreResult<StockDocument> {
        let mut tx = self.store.begin().await?;
        warehouse::get_document(&mut tx, document_id).await
    }

    pub async fn create_item_request(
        &self,
        actor: &Actor,
        mut input: NewItemRequest,
    ) -> CoreResult<ItemRequest> {
        input.requested_by_id = actor.user_id;

        let mut tx = self.store.begin().await?;
        let request = warehouse::create_item_request(&mut tx, input).await?;
        tx.commit().await?;
        Ok(request)
    }

    pub async fn item_request(&self, request_id: Uuid) -> CoreResult<ItemRequest> {
        let mut tx = self.store.begin().await?;
        warehouse::get_item_request(&mut tx, request_id).await
    }

    pub async fn submit_item_request(
        &self,
        actor: &Actor,
        request_id: Uuid,
    ) -> CoreResult<ItemRequest> {
        let mut tx = self.store.begin().await?;
        let request = warehouse::submit_item_request(&mut tx, request_id, actor).await?;
        tx.commit().await?;
        Ok(request)
    }

    pub async fn approve_item_request(
        &self,
        actor: &Actor,
        request_id: Uuid,
        note: Option<String>,
    ) -> CoreResult<ItemRequest> {
        let mut tx = self.store.begin().await?;
        let request = warehouse::approve_item_request(&mut tx, request_id, actor, note).await?;
        tx.commit().await?;
        Ok(request)
    }

    pub async fn reject_item_request(
        &self,
        actor: &Actor,
        request_id: Uuid,
        note: Option<String>,
    ) -> CoreResult<ItemRequest> {
        let mut tx = self.store.begin().await?;
        let request = warehouse::reject_item_request(&mut tx, request_id, actor, note).await?;
        tx.commit().await?;
        Ok(request)
    }

    pub async fn fulfil_item_request(
        &self,
        actor: &Actor,
        request_id: Uuid,
        fulfil: FulfilItemRequest,
    ) -> CoreResult<(ItemRequest, StockDocument)> {
        let mut tx = self.store.begin().await?;
        let outcome = warehouse::fulfil_item_request(&mut tx, request_id, actor, fulfil).await?;
        tx.commit().await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pks_core::{CoreError, ItemCategory, ReceiptSource, Role};
    use pks_finance::FinanceService;
    use pks_store::InMemoryLedgerStore;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn weighbridge_operator_cannot_move_stock() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let company = Uuid::new_v4();
        FinanceService::new(Arc::clone(&store))
            .install_template(company, &pks_core::PksChartTemplate)
            .await
            .unwrap();
        let service = WarehouseService::new(store);

        let input = GoodsReceiptInput {
            company_id: company,
            date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            warehouse_id: Uuid::new_v4(),
            source: ReceiptSource::Production,
            counterparty: None,
            memo: None,
            lines: vec![ReceiptLineInput {
                item_id: Uuid::new_v4(),
                item_category: ItemCategory::Cpo,
                bin_id: Some("TANK-1".into()),
                qty: dec!(1000),
                unit_cost: dec!(11500),
                note: None,
            }],
            created_by_id: Uuid::nil(),
        };

        let operator = Actor::new(Uuid::new_v4(), Role::WeighbridgeOperator);
        assert!(matches!(
            service.goods_receipt(&operator, input.clone()).await,
            Err(CoreError::Forbidden(_))
        ));

        let clerk = Actor::new(Uuid::new_v4(), Role::Warehouse);
        let document = service.goods_receipt(&clerk, input).await.unwrap();
        assert_eq!(document.created_by_id, clerk.user_id);
        assert_eq!(service.document(document.id).await.unwrap(), document);
        assert_eq!(service.valuation(None).await.unwrap(), dec!(11500000));

        let tank = service
            .balance(document.lines[0].item_id, document.warehouse_id, Some("TANK-1"))
            .await
            .unwrap();
        assert_eq!(tank.qty_on_hand, dec!(1000));
    }
}
