use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreResult;
use crate::models::{
    Account, AccountClass, AccountStatus, JournalEntry, OpeningBalance, PostedLine, SourceType,
};
use crate::stock::{ItemRequest, StockBalance, StockDocument, StockDocumentLine, StockLedgerEntry};
use crate::system_accounts::{SystemAccountKey, SystemAccountMapping};
use crate::weighbridge::{TicketStatus, WeighbridgeTicket};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountFilter {
    pub company_id: Uuid,
    pub search: Option<String>,
    pub class: Option<AccountClass>,
    pub status: Option<AccountStatus>,
    pub is_posting: Option<bool>,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

/// Selects POSTED journal lines. Date bounds are inclusive except `before`.
#[derive(Debug, Clone, Default)]
pub struct LineQuery {
    pub company_id: Uuid,
    pub account_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub before: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketFilter {
    pub company_id: Uuid,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<TicketStatus>,
    pub supplier_id: Option<Uuid>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct StockLedgerQuery {
    pub item_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    pub ref_table: Option<String>,
    pub ref_id: Option<Uuid>,
}

/// Opens transactions against a backing store.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx;

    async fn begin(&self) -> CoreResult<Self::Tx>;
}

/// Every read and write the engines perform, scoped to one ACID transaction.
///
/// Dropping a transaction without calling [`LedgerTx::commit`] discards its
/// writes. Methods named `lock_*` hold the row until the transaction ends.
#[async_trait]
pub trait LedgerTx: Send {
    async fn commit(self) -> CoreResult<()>;

    /// Atomically bumps the counter for `scope` to `max(current, floor) + 1`.
    async fn allocate_sequence(&mut self, scope: &str, floor: i64) -> CoreResult<i64>;

    // accounts
    async fn find_account(&mut self, id: Uuid) -> CoreResult<Option<Account>>;
    async fn find_account_by_code(
        &mut self,
        company_id: Uuid,
        code: &str,
    ) -> CoreResult<Option<Account>>;
    async fn list_accounts(&mut self, company_id: Uuid) -> CoreResult<Vec<Account>>;
    async fn page_accounts(&mut self, filter: &AccountFilter) -> CoreResult<Page<Account>>;
    async fn insert_account(&mut self, account: &Account) -> CoreResult<()>;
    async fn update_account(&mut self, account: &Account) -> CoreResult<()>;
    async fn delete_account(&mut self, id: Uuid) -> CoreResult<()>;
    async fn count_child_accounts(&mut self, id: Uuid) -> CoreResult<u64>;
    async fn count_account_lines(&mut self, id: Uuid) -> CoreResult<u64>;

    // system account map
    async fn upsert_system_account(&mut self, mapping: &SystemAccountMapping) -> CoreResult<()>;
    async fn find_system_account(
        &mut self,
        company_id: Uuid,
        key: SystemAccountKey,
    ) -> CoreResult<Option<Uuid>>;
    async fn list_system_accounts(&mut self, company_id: Uuid)
    -> CoreResult<Vec<SystemAccountMapping>>;
    async fn count_system_account_refs(&mut self, account_id: Uuid) -> CoreResult<u64>;

    // journal
    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> CoreResult<()>;
    async fn find_journal_entry(&mut self, id: Uuid) -> CoreResult<Option<JournalEntry>>;
    async fn lock_journal_entry(&mut self, id: Uuid) -> CoreResult<Option<JournalEntry>>;
    async fn update_journal_entry(&mut self, entry: &JournalEntry) -> CoreResult<()>;
    async fn journal_entries_by_source(
        &mut self,
        source_type: SourceType,
        source_id: Uuid,
    ) -> CoreResult<Vec<JournalEntry>>;
    async fn entry_numbers_in_window(
        &mut self,
        company_id: Uuid,
        window: &str,
    ) -> CoreResult<Vec<String>>;
    async fn posted_lines(&mut self, query: &LineQuery) -> CoreResult<Vec<PostedLine>>;
    async fn upsert_opening_balance(&mut self, opening: &OpeningBalance) -> CoreResult<()>;
    /// Latest opening balance per account with `period_start <= on`.
    async fn opening_balances(
        &mut self,
        company_id: Uuid,
        on: NaiveDate,
    ) -> CoreResult<Vec<OpeningBalance>>;

    // stock
    async fn find_stock_balance(
        &mut self,
        item_id: Uuid,
        warehouse_id: Uuid,
        bin_id: &str,
    ) -> CoreResult<Option<StockBalance>>;
    /// Materializes a zero row when absent, then locks it.
    async fn lock_stock_balance(
        &mut self,
        item_id: Uuid,
        warehouse_id: Uuid,
        bin_id: &str,
    ) -> CoreResult<StockBalance>;
    async fn save_stock_balance(&mut self, balance: &StockBalance) -> CoreResult<()>;
    async fn append_stock_ledger(&mut self, entry: &StockLedgerEntry) -> CoreResult<()>;
    async fn stock_ledger(&mut self, query: &StockLedgerQuery)
    -> CoreResult<Vec<StockLedgerEntry>>;
    async fn stock_valuation(&mut self, warehouse_id: Option<Uuid>) -> CoreResult<Decimal>;

    // warehouse documents
    async fn insert_stock_document(&mut self, document: &StockDocument) -> CoreResult<()>;
    async fn lock_stock_document(&mut self, id: Uuid) -> CoreResult<Option<StockDocument>>;
    async fn find_stock_document(&mut self, id: Uuid) -> CoreResult<Option<StockDocument>>;
    async fn update_stock_document(&mut self, document: &StockDocument) -> CoreResult<()>;
    async fn document_numbers_in_window(
        &mut self,
        company_id: Uuid,
        window: &str,
    ) -> CoreResult<Vec<String>>;
    async fn find_stock_document_line(
        &mut self,
        line_id: Uuid,
    ) -> CoreResult<Option<(StockDocument, StockDocumentLine)>>;
    /// Quantity already returned against a loan issue line by POSTED returns.
    async fn returned_loan_qty(&mut self, loan_issue_line_id: Uuid) -> CoreResult<Decimal>;

    // item requests
    async fn insert_item_request(&mut self, request: &ItemRequest) -> CoreResult<()>;
    async fn lock_item_request(&mut self, id: Uuid) -> CoreResult<Option<ItemRequest>>;
    async fn update_item_request(&mut self, request: &ItemRequest) -> CoreResult<()>;

    // weighbridge
    async fn insert_ticket(&mut self, ticket: &WeighbridgeTicket) -> CoreResult<()>;
    async fn find_ticket(&mut self, id: Uuid) -> CoreResult<Option<WeighbridgeTicket>>;
    async fn lock_ticket(&mut self, id: Uuid) -> CoreResult<Option<WeighbridgeTicket>>;
    async fn update_ticket(&mut self, ticket: &WeighbridgeTicket) -> CoreResult<()>;
    async fn list_tickets(&mut self, filter: &TicketFilter) -> CoreResult<Vec<WeighbridgeTicket>>;
    async fn ticket_numbers_in_window(
        &mut self,
        company_id: Uuid,
        window: &str,
    ) -> CoreResult<Vec<String>>;
}
