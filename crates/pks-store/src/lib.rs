//! In-memory implementation of the ledger storage traits.
//!
//! Transactions are fully serialized: `begin` takes the store lock (bounded by
//! the configured timeout) and works on a private copy of the state that is
//! swapped in on `commit`. Dropping the transaction discards the copy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use pks_core::{
    Account, AccountFilter, CoreError, CoreResult, DocumentKind, DocumentStatus, ItemRequest,
    JournalEntry, JournalStatus, LedgerStore, LedgerTx, LineQuery, OpeningBalance, Page,
    PostedLine, SourceType, StockBalance, StockDocument, StockDocumentLine, StockLedgerEntry,
    StockLedgerQuery, SystemAccountKey, SystemAccountMapping, TicketFilter, WeighbridgeTicket,
};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PAGE_SIZE: u32 = 50;

type BalanceKey = (Uuid, Uuid, String);

#[derive(Debug, Clone, Default)]
struct StoreState {
    sequences: HashMap<String, i64>,
    accounts: HashMap<Uuid, Account>,
    system_accounts: HashMap<(Uuid, SystemAccountKey), Uuid>,
    journal_entries: HashMap<Uuid, JournalEntry>,
    opening_balances: HashMap<(Uuid, Uuid, NaiveDate), OpeningBalance>,
    stock_balances: HashMap<BalanceKey, StockBalance>,
    stock_ledger: Vec<StockLedgerEntry>,
    documents: HashMap<Uuid, StockDocument>,
    item_requests: HashMap<Uuid, ItemRequest>,
    tickets: HashMap<Uuid, WeighbridgeTicket>,
}

#[derive(Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<StoreState>>,
    lock_timeout: Duration,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> CoreResult<InMemoryTx> {
        let guard = tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| CoreError::LockTimeout)?;
        let working = guard.clone();
        Ok(InMemoryTx { guard, working })
    }
}

pub struct InMemoryTx {
    guard: OwnedMutexGuard<StoreState>,
    working: StoreState,
}

fn balance_key(item_id: Uuid, warehouse_id: Uuid, bin_id: &str) -> BalanceKey {
    (item_id, warehouse_id, bin_id.to_string())
}

fn in_range(date: NaiveDate, query: &LineQuery) -> bool {
    query.from.is_none_or(|from| date >= from)
        && query.to.is_none_or(|to| date <= to)
        && query.before.is_none_or(|before| date < before)
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn commit(self) -> CoreResult<()> {
        let Self { mut guard, working } = self;
        *guard = working;
        debug!("in-memory transaction committed");
        Ok(())
    }

    async fn allocate_sequence(&mut self, scope: &str, floor: i64) -> CoreResult<i64> {
        let counter = self
            .working
            .sequences
            .entry(scope.to_string())
            .or_insert(0);
        *counter = (*counter).max(floor) + 1;
        Ok(*counter)
    }

    async fn find_account(&mut self, id: Uuid) -> CoreResult<Option<Account>> {
        Ok(self.working.accounts.get(&id).cloned())
    }

    async fn find_account_by_code(
        &mut self,
        company_id: Uuid,
        code: &str,
    ) -> CoreResult<Option<Account>> {
        Ok(self
            .working
            .accounts
            .values()
            .find(|account| account.company_id == company_id && account.code == code)
            .cloned())
    }

    async fn list_accounts(&mut self, company_id: Uuid) -> CoreResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .working
            .accounts
            .values()
            .filter(|account| account.company_id == company_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(accounts)
    }

    async fn page_accounts(&mut self, filter: &AccountFilter) -> CoreResult<Page<Account>> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_lowercase);

        let mut matching: Vec<Account> = self
            .working
            .accounts
            .values()
            .filter(|account| account.company_id == filter.company_id)
            .filter(|account| filter.class.is_none_or(|class| account.class == class))
            .filter(|account| filter.status.is_none_or(|status| account.status == status))
            .filter(|account| filter.is_posting.is_none_or(|flag| account.is_posting == flag))
            .filter(|account| {
                search.as_deref().is_none_or(|needle| {
                    account.code.to_lowercase().contains(needle)
                        || account.name.to_lowercase().contains(needle)
                })
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.code.cmp(&b.code));

        let per_page = if filter.per_page == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            filter.per_page
        };
        let page = filter.page.max(1);
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(((page - 1) as usize).saturating_mul(per_page as usize))
            .take(per_page as usize)
            .collect();

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    async fn insert_account(&mut self, account: &Account) -> CoreResult<()> {
        let duplicate = self.working.accounts.values().any(|existing| {
            existing.company_id == account.company_id && existing.code == account.code
        });
        if duplicate {
            return Err(CoreError::DuplicateCode(account.code.clone()));
        }
        self.working.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn update_account(&mut self, account: &Account) -> CoreResult<()> {
        let duplicate = self.working.accounts.values().any(|existing| {
            existing.id != account.id
                && existing.company_id == account.company_id
                && existing.code == account.code
        });
        if duplicate {
            return Err(CoreError::DuplicateCode(account.code.clone()));
        }
        match self.working.accounts.get_mut(&account.id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(CoreError::not_found("account", account.id)),
        }
    }

    async fn delete_account(&mut self, id: Uuid) -> CoreResult<()> {
        self.working
            .accounts
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("account", id))
    }

    async fn count_child_accounts(&mut self, id: Uuid) -> CoreResult<u64> {
        Ok(self
            .working
            .accounts
            .values()
            .filter(|account| account.parent_id == Some(id))
            .count() as u64)
    }

    async fn count_account_lines(&mut self, id: Uuid) -> CoreResult<u64> {
        Ok(self
            .working
            .journal_entries
            .values()
            .flat_map(|entry| entry.lines.iter())
            .filter(|line| line.account_id == id)
            .count() as u64)
    }

    async fn upsert_system_account(&mut self, mapping: &SystemAccountMapping) -> CoreResult<()> {
        self.working
            .system_accounts
            .insert((mapping.company_id, mapping.key), mapping.account_id);
        Ok(())
    }

    async fn find_system_account(
        &mut self,
        company_id: Uuid,
        key: SystemAccountKey,
    ) -> CoreResult<Option<Uuid>> {
        Ok(self.working.system_accounts.get(&(company_id, key)).copied())
    }

    async fn list_system_accounts(
        &mut self,
        company_id: Uuid,
    ) -> CoreResult<Vec<SystemAccountMapping>> {
        let mut mappings: Vec<SystemAccountMapping> = self
            .working
            .system_accounts
            .iter()
            .filter(|((company, _), _)| *company == company_id)
            .map(|((company, key), account_id)| SystemAccountMapping {
                company_id: *company,
                key: *key,
                account_id: *account_id,
            })
            .collect();
        mappings.sort_by_key(|mapping| mapping.key);
        Ok(mappings)
    }

    async fn count_system_account_refs(&mut self, account_id: Uuid) -> CoreResult<u64> {
        Ok(self
            .working
            .system_accounts
            .values()
            .filter(|mapped| **mapped == account_id)
            .count() as u64)
    }

    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> CoreResult<()> {
        let duplicate = self.working.journal_entries.values().any(|existing| {
            existing.company_id == entry.company_id && existing.entry_number == entry.entry_number
        });
        if duplicate {
            return Err(CoreError::DuplicateEntryNumber(entry.entry_number.clone()));
        }
        self.working.journal_entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn find_journal_entry(&mut self, id: Uuid) -> CoreResult<Option<JournalEntry>> {
        Ok(self.working.journal_entries.get(&id).cloned())
    }

    async fn lock_journal_entry(&mut self, id: Uuid) -> CoreResult<Option<JournalEntry>> {
        self.find_journal_entry(id).await
    }

    async fn update_journal_entry(&mut self, entry: &JournalEntry) -> CoreResult<()> {
        match self.working.journal_entries.get_mut(&entry.id) {
            Some(existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(CoreError::not_found("journal entry", entry.id)),
        }
    }

    async fn journal_entries_by_source(
        &mut self,
        source_type: SourceType,
        source_id: Uuid,
    ) -> CoreResult<Vec<JournalEntry>> {
        let mut entries: Vec<JournalEntry> = self
            .working
            .journal_entries
            .values()
            .filter(|entry| entry.source_type == source_type && entry.source_id == Some(source_id))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.entry_number.cmp(&b.entry_number));
        Ok(entries)
    }

    async fn entry_numbers_in_window(
        &mut self,
        company_id: Uuid,
        window: &str,
    ) -> CoreResult<Vec<String>> {
        Ok(self
            .working
            .journal_entries
            .values()
            .filter(|entry| {
                entry.company_id == company_id && entry.entry_number.starts_with(window)
            })
            .map(|entry| entry.entry_number.clone())
            .collect())
    }

    async fn posted_lines(&mut self, query: &LineQuery) -> CoreResult<Vec<PostedLine>> {
        let mut lines: Vec<PostedLine> = self
            .working
            .journal_entries
            .values()
            .filter(|entry| entry.company_id == query.company_id)
            .filter(|entry| entry.status == JournalStatus::Posted)
            .filter(|entry| in_range(entry.date, query))
            .flat_map(|entry| {
                entry
                    .lines
                    .iter()
                    .filter(|line| query.account_id.is_none_or(|id| line.account_id == id))
                    .map(|line| PostedLine {
                        entry_id: entry.id,
                        entry_number: entry.entry_number.clone(),
                        date: entry.date,
                        source_type: entry.source_type,
                        memo: entry.memo.clone(),
                        account_id: line.account_id,
                        debit: line.debit,
                        credit: line.credit,
                        description: line.description.clone(),
                    })
            })
            .collect();
        lines.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.entry_number.cmp(&b.entry_number))
        });
        Ok(lines)
    }

    async fn upsert_opening_balance(&mut self, opening: &OpeningBalance) -> CoreResult<()> {
        self.working.opening_balances.insert(
            (opening.company_id, opening.account_id, opening.period_start),
            opening.clone(),
        );
        Ok(())
    }

    async fn opening_balances(
        &mut self,
        company_id: Uuid,
        on: NaiveDate,
    ) -> CoreResult<Vec<OpeningBalance>> {
        let mut latest: HashMap<Uuid, OpeningBalance> = HashMap::new();
        for opening in self.working.opening_balances.values() {
            if opening.company_id != company_id || opening.period_start > on {
                continue;
            }
            let newer = latest
                .get(&opening.account_id)
                .is_none_or(|current| current.period_start < opening.period_start);
            if newer {
                latest.insert(opening.account_id, opening.clone());
            }
        }
        Ok(latest.into_values().collect())
    }

    async fn find_stock_balance(
        &mut self,
        item_id: Uuid,
        warehouse_id: Uuid,
        bin_id: &str,
    ) -> CoreResult<Option<StockBalance>> {
        Ok(self
            .working
            .stock_balances
            .get(&balance_key(item_id, warehouse_id, bin_id))
            .cloned())
    }

    async fn lock_stock_balance(
        &mut self,
        item_id: Uuid,
        warehouse_id: Uuid,
        bin_id: &str,
    ) -> CoreResult<StockBalance> {
        Ok(self
            .working
            .stock_balances
            .entry(balance_key(item_id, warehouse_id, bin_id))
            .or_insert_with(|| StockBalance::empty(item_id, warehouse_id, bin_id))
            .clone())
    }

    async fn save_stock_balance(&mut self, balance: &StockBalance) -> CoreResult<()> {
        let key = balance_key(balance.item_id, balance.warehouse_id, &balance.bin_id);
        let mut stored = balance.clone();
        stored.updated_at = Utc::now();
        self.working.stock_balances.insert(key, stored);
        Ok(())
    }

    async fn append_stock_ledger(&mut self, entry: &StockLedgerEntry) -> CoreResult<()> {
        self.working.stock_ledger.push(entry.clone());
        Ok(())
    }

    async fn stock_ledger(
        &mut self,
        query: &StockLedgerQuery,
    ) -> CoreResult<Vec<StockLedgerEntry>> {
        Ok(self
            .working
            .stock_ledger
            .iter()
            .filter(|entry| query.item_id.is_none_or(|id| entry.item_id == id))
            .filter(|entry| query.warehouse_id.is_none_or(|id| entry.warehouse_id == id))
            .filter(|entry| {
                query
                    .ref_table
                    .as_deref()
                    .is_none_or(|table| entry.ref_table == table)
            })
            .filter(|entry| query.ref_id.is_none_or(|id| entry.ref_id == id))
            .cloned()
            .collect())
    }

    async fn stock_valuation(&mut self, warehouse_id: Option<Uuid>) -> CoreResult<Decimal> {
        Ok(self
            .working
            .stock_balances
            .values()
            .filter(|balance| warehouse_id.is_none_or(|id| balance.warehouse_id == id))
            .map(StockBalance::value)
            .sum())
    }

    async fn insert_stock_document(&mut self, document: &StockDocument) -> CoreResult<()> {
        let duplicate = self.working.documents.values().any(|existing| {
            existing.company_id == document.company_id && existing.number == document.number
        });
        if duplicate {
            return Err(CoreError::Storage(format!(
                "document number {} already exists",
                document.number
            )));
        }
        self.working.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn lock_stock_document(&mut self, id: Uuid) -> CoreResult<Option<StockDocument>> {
        self.find_stock_document(id).await
    }

    async fn find_stock_document(&mut self, id: Uuid) -> CoreResult<Option<StockDocument>> {
        Ok(self.working.documents.get(&id).cloned())
    }

    async fn update_stock_document(&mut self, document: &StockDocument) -> CoreResult<()> {
        match self.working.documents.get_mut(&document.id) {
            Some(existing) => {
                *existing = document.clone();
                Ok(())
            }
            None => Err(CoreError::not_found("stock document", document.id)),
        }
    }

    async fn document_numbers_in_window(
        &mut self,
        company_id: Uuid,
        window: &str,
    ) -> CoreResult<Vec<String>> {
        let documents = self
            .working
            .documents
            .values()
            .filter(|document| document.company_id == company_id)
            .map(|document| &document.number);
        let requests = self
            .working
            .item_requests
            .values()
            .filter(|request| request.company_id == company_id)
            .map(|request| &request.number);
        Ok(documents
            .chain(requests)
            .filter(|number| number.starts_with(window))
            .cloned()
            .collect())
    }

    async fn find_stock_document_line(
        &mut self,
        line_id: Uuid,
    ) -> CoreResult<Option<(StockDocument, StockDocumentLine)>> {
        Ok(self.working.documents.values().find_map(|document| {
            document
                .lines
                .iter()
                .find(|line| line.id == line_id)
                .map(|line| (document.clone(), line.clone()))
        }))
    }

    async fn returned_loan_qty(&mut self, loan_issue_line_id: Uuid) -> CoreResult<Decimal> {
        Ok(self
            .working
            .documents
            .values()
            .filter(|document| {
                document.kind == DocumentKind::LoanReturn
                    && document.status == DocumentStatus::Posted
            })
            .flat_map(|document| document.lines.iter())
            .filter(|line| line.loan_issue_line_id == Some(loan_issue_line_id))
            .map(|line| line.qty)
            .sum())
    }

    async fn insert_item_request(&mut self, request: &ItemRequest) -> CoreResult<()> {
        self.working
            .item_requests
            .insert(request.id, request.clone());
        Ok(())
    }

    async fn lock_item_request(&mut self, id: Uuid) -> CoreResult<Option<ItemRequest>> {
        Ok(self.working.item_requests.get(&id).cloned())
    }

    async fn update_item_request(&mut self, request: &ItemRequest) -> CoreResult<()> {
        match self.working.item_requests.get_mut(&request.id) {
            Some(existing) => {
                *existing = request.clone();
                Ok(())
            }
            None => Err(CoreError::not_found("item request", request.id)),
        }
    }

    async fn insert_ticket(&mut self, ticket: &WeighbridgeTicket) -> CoreResult<()> {
        let duplicate = self.working.tickets.values().any(|existing| {
            existing.company_id == ticket.company_id && existing.no_seri == ticket.no_seri
        });
        if duplicate {
            return Err(CoreError::DuplicateTicketNumber(ticket.no_seri.clone()));
        }
        self.working.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn find_ticket(&mut self, id: Uuid) -> CoreResult<Option<WeighbridgeTicket>> {
        Ok(self.working.tickets.get(&id).cloned())
    }

    async fn lock_ticket(&mut self, id: Uuid) -> CoreResult<Option<WeighbridgeTicket>> {
        self.find_ticket(id).await
    }

    async fn update_ticket(&mut self, ticket: &WeighbridgeTicket) -> CoreResult<()> {
        match self.working.tickets.get_mut(&ticket.id) {
            Some(existing) => {
                *existing = ticket.clone();
                Ok(())
            }
            None => Err(CoreError::not_found("weighbridge ticket", ticket.id)),
        }
    }

    async fn list_tickets(&mut self, filter: &TicketFilter) -> CoreResult<Vec<WeighbridgeTicket>> {
        let mut tickets: Vec<WeighbridgeTicket> = self
            .working
            .tickets
            .values()
            .filter(|ticket| ticket.company_id == filter.company_id)
            .filter(|ticket| filter.from.is_none_or(|from| ticket.tanggal >= from))
            .filter(|ticket| filter.to.is_none_or(|to| ticket.tanggal <= to))
            .filter(|ticket| filter.status.is_none_or(|status| ticket.status == status))
            .filter(|ticket| filter.supplier_id.is_none_or(|id| ticket.supplier_id == id))
            .cloned()
            .collect();
        tickets.sort_by(|a, b| {
            a.tanggal
                .cmp(&b.tanggal)
                .then_with(|| a.no_seri.cmp(&b.no_seri))
        });
        if let Some(limit) = filter.limit {
            tickets.truncate(limit as usize);
        }
        Ok(tickets)
    }

    async fn ticket_numbers_in_window(
        &mut self,
        company_id: Uuid,
        window: &str,
    ) -> CoreResult<Vec<String>> {
        Ok(self
            .working
            .tickets
            .values()
            .filter(|ticket| ticket.company_id == company_id && ticket.no_seri.starts_with(window))
            .map(|ticket| ticket.no_seri.clone())
            .collect())
    }
}
