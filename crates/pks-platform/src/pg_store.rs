//! Postgres implementation of the ledger storage traits.
//!
//! Each transaction sets a local `lock_timeout`, so a blocked row lock
//! surfaces as [`CoreError::LockTimeout`] instead of waiting indefinitely.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use pks_core::{
    Account, AccountFilter, CoreError, CoreResult, ItemRequest, ItemRequestLine, JournalEntry,
    JournalLine, LedgerStore, LedgerTx, LineQuery, OpeningBalance, Page, PostedLine, SourceType,
    StockBalance, StockDocument, StockDocumentLine, StockLedgerEntry, StockLedgerQuery,
    SystemAccountKey, SystemAccountMapping, TicketFilter, WeighbridgeTicket,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: u32 = 50;

const ACCOUNT_COLUMNS: &str =
    "id, company_id, code, name, class, normal_side, is_posting, parent_id, status";
const ENTRY_COLUMNS: &str = "id, company_id, entry_number, date, source_type, source_id, memo, \
     status, posted_at, posted_by_id, created_by_id, created_at";
const BALANCE_COLUMNS: &str =
    "item_id, warehouse_id, bin_id, qty_on_hand, avg_cost, version, updated_at";
const LEDGER_COLUMNS: &str = "id, item_id, warehouse_id, bin_id, ledger_type, qty, before_qty, \
     after_qty, unit_cost, ref_table, ref_id, note, created_at";
const DOCUMENT_COLUMNS: &str = "id, company_id, kind, number, date, warehouse_id, receipt_source, \
     counterparty, item_request_id, memo, status, journal_entry_id, created_by_id, created_at";
const REQUEST_COLUMNS: &str = "id, company_id, number, date, warehouse_id, department, status, \
     requested_by_id, decided_by_id, decision_note, goods_issue_id, created_at";
const TICKET_COLUMNS: &str = "id, company_id, no_seri, vehicle_id, supplier_id, item_id, tanggal, \
     jam_masuk, jam_keluar, timbang1, timbang2, netto1, pot_percent, pot_kg, berat_terima, \
     harga_per_kg, pph_rate, upah_bongkar_per_kg, total, total_pph, total_upah_bongkar, \
     total_pembayaran_supplier, status, warehouse_id, approved_by_id, approved_at, \
     purchase_je_id, unload_je_id, created_by_id, created_at";

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> CoreResult<PgLedgerTx> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        Ok(PgLedgerTx { tx })
    }
}

pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

/// Lock waits, serialization failures and deadlocks are all worth a retry.
fn storage_error(err: sqlx::Error) -> CoreError {
    if let Some(db) = err.as_database_error()
        && matches!(db.code().as_deref(), Some("55P03" | "40001" | "40P01"))
    {
        debug!(error = %err, "postgres lock conflict");
        return CoreError::LockTimeout;
    }
    CoreError::Storage(err.to_string())
}

/// Constraint name of a unique violation.
fn unique_violation(err: &sqlx::Error) -> Option<String> {
    let db = err.as_database_error()?;
    if db.code().as_deref() != Some("23505") {
        return None;
    }
    Some(db.constraint().unwrap_or_default().to_string())
}

fn text<T: FromStr<Err = CoreError>>(row: &PgRow, column: &str) -> CoreResult<T> {
    let raw: String = row.try_get(column).map_err(storage_error)?;
    raw.parse()
}

fn optional_text<T: FromStr<Err = CoreError>>(row: &PgRow, column: &str) -> CoreResult<Option<T>> {
    let raw: Option<String> = row.try_get(column).map_err(storage_error)?;
    raw.map(|value| value.parse()).transpose()
}

fn count(row: &PgRow) -> CoreResult<u64> {
    let value: i64 = row.try_get(0).map_err(storage_error)?;
    Ok(value.max(0) as u64)
}

fn account_from_row(row: &PgRow) -> CoreResult<Account> {
    Ok(Account {
        id: row.try_get("id").map_err(storage_error)?,
        company_id: row.try_get("company_id").map_err(storage_error)?,
        code: row.try_get("code").map_err(storage_error)?,
        name: row.try_get("name").map_err(storage_error)?,
        class: text(row, "class")?,
        normal_side: text(row, "normal_side")?,
        is_posting: row.try_get("is_posting").map_err(storage_error)?,
        parent_id: row.try_get("parent_id").map_err(storage_error)?,
        status: text(row, "status")?,
    })
}

fn entry_from_row(row: &PgRow) -> CoreResult<JournalEntry> {
    Ok(JournalEntry {
        id: row.try_get("id").map_err(storage_error)?,
        company_id: row.try_get("company_id").map_err(storage_error)?,
        entry_number: row.try_get("entry_number").map_err(storage_error)?,
        date: row.try_get("date").map_err(storage_error)?,
        source_type: text(row, "source_type")?,
        source_id: row.try_get("source_id").map_err(storage_error)?,
        memo: row.try_get("memo").map_err(storage_error)?,
        status: text(row, "status")?,
        posted_at: row.try_get("posted_at").map_err(storage_error)?,
        posted_by_id: row.try_get("posted_by_id").map_err(storage_error)?,
        created_by_id: row.try_get("created_by_id").map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
        lines: Vec::new(),
    })
}

fn journal_line_from_row(row: &PgRow) -> CoreResult<JournalLine> {
    Ok(JournalLine {
        id: row.try_get("id").map_err(storage_error)?,
        account_id: row.try_get("account_id").map_err(storage_error)?,
        debit: row.try_get("debit").map_err(storage_error)?,
        credit: row.try_get("credit").map_err(storage_error)?,
        cost_center: row.try_get("cost_center").map_err(storage_error)?,
        dept: row.try_get("dept").map_err(storage_error)?,
        item_id: row.try_get("item_id").map_err(storage_error)?,
        warehouse_id: row.try_get("warehouse_id").map_err(storage_error)?,
        description: row.try_get("description").map_err(storage_error)?,
    })
}

fn balance_from_row(row: &PgRow) -> CoreResult<StockBalance> {
    Ok(StockBalance {
        item_id: row.try_get("item_id").map_err(storage_error)?,
        warehouse_id: row.try_get("warehouse_id").map_err(storage_error)?,
        bin_id: row.try_get("bin_id").map_err(storage_error)?,
        qty_on_hand: row.try_get("qty_on_hand").map_err(storage_error)?,
        avg_cost: row.try_get("avg_cost").map_err(storage_error)?,
        version: row.try_get("version").map_err(storage_error)?,
        updated_at: row.try_get("updated_at").map_err(storage_error)?,
    })
}

fn ledger_entry_from_row(row: &PgRow) -> CoreResult<StockLedgerEntry> {
    Ok(StockLedgerEntry {
        id: row.try_get("id").map_err(storage_error)?,
        item_id: row.try_get("item_id").map_err(storage_error)?,
        warehouse_id: row.try_get("warehouse_id").map_err(storage_error)?,
        bin_id: row.try_get("bin_id").map_err(storage_error)?,
        ledger_type: text(row, "ledger_type")?,
        qty: row.try_get("qty").map_err(storage_error)?,
        before_qty: row.try_get("before_qty").map_err(storage_error)?,
        after_qty: row.try_get("after_qty").map_err(storage_error)?,
        unit_cost: row.try_get("unit_cost").map_err(storage_error)?,
        ref_table: row.try_get("ref_table").map_err(storage_error)?,
        ref_id: row.try_get("ref_id").map_err(storage_error)?,
        note: row.try_get("note").map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
    })
}

fn document_from_row(row: &PgRow) -> CoreResult<StockDocument> {
    Ok(StockDocument {
        id: row.try_get("id").map_err(storage_error)?,
        company_id: row.try_get("company_id").map_err(storage_error)?,
        kind: text(row, "kind")?,
        number: row.try_get("number").map_err(storage_error)?,
        date: row.try_get("date").map_err(storage_error)?,
        warehouse_id: row.try_get("warehouse_id").map_err(storage_error)?,
        receipt_source: optional_text(row, "receipt_source")?,
        counterparty: row.try_get("counterparty").map_err(storage_error)?,
        item_request_id: row.try_get("item_request_id").map_err(storage_error)?,
        memo: row.try_get("memo").map_err(storage_error)?,
        status: text(row, "status")?,
        journal_entry_id: row.try_get("journal_entry_id").map_err(storage_error)?,
        created_by_id: row.try_get("created_by_id").map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
        lines: Vec::new(),
    })
}

fn document_line_from_row(row: &PgRow) -> CoreResult<StockDocumentLine> {
    Ok(StockDocumentLine {
        id: row.try_get("id").map_err(storage_error)?,
        item_id: row.try_get("item_id").map_err(storage_error)?,
        item_category: text(row, "item_category")?,
        bin_id: row.try_get("bin_id").map_err(storage_error)?,
        ledger_type: text(row, "ledger_type")?,
        qty: row.try_get("qty").map_err(storage_error)?,
        unit_cost: row.try_get("unit_cost").map_err(storage_error)?,
        amount: row.try_get("amount").map_err(storage_error)?,
        account_id: row.try_get("account_id").map_err(storage_error)?,
        cost_center: row.try_get("cost_center").map_err(storage_error)?,
        loan_issue_line_id: row.try_get("loan_issue_line_id").map_err(storage_error)?,
        note: row.try_get("note").map_err(storage_error)?,
    })
}

fn request_from_row(row: &PgRow) -> CoreResult<ItemRequest> {
    Ok(ItemRequest {
        id: row.try_get("id").map_err(storage_error)?,
        company_id: row.try_get("company_id").map_err(storage_error)?,
        number: row.try_get("number").map_err(storage_error)?,
        date: row.try_get("date").map_err(storage_error)?,
        warehouse_id: row.try_get("warehouse_id").map_err(storage_error)?,
        department: row.try_get("department").map_err(storage_error)?,
        status: text(row, "status")?,
        requested_by_id: row.try_get("requested_by_id").map_err(storage_error)?,
        decided_by_id: row.try_get("decided_by_id").map_err(storage_error)?,
        decision_note: row.try_get("decision_note").map_err(storage_error)?,
        goods_issue_id: row.try_get("goods_issue_id").map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
        lines: Vec::new(),
    })
}

fn ticket_from_row(row: &PgRow) -> CoreResult<WeighbridgeTicket> {
    Ok(WeighbridgeTicket {
        id: row.try_get("id").map_err(storage_error)?,
        company_id: row.try_get("company_id").map_err(storage_error)?,
        no_seri: row.try_get("no_seri").map_err(storage_error)?,
        vehicle_id: row.try_get("vehicle_id").map_err(storage_error)?,
        supplier_id: row.try_get("supplier_id").map_err(storage_error)?,
        item_id: row.try_get("item_id").map_err(storage_error)?,
        tanggal: row.try_get("tanggal").map_err(storage_error)?,
        jam_masuk: row.try_get("jam_masuk").map_err(storage_error)?,
        jam_keluar: row.try_get("jam_keluar").map_err(storage_error)?,
        timbang1: row.try_get("timbang1").map_err(storage_error)?,
        timbang2: row.try_get("timbang2").map_err(storage_error)?,
        netto1: row.try_get("netto1").map_err(storage_error)?,
        pot_percent: row.try_get("pot_percent").map_err(storage_error)?,
        pot_kg: row.try_get("pot_kg").map_err(storage_error)?,
        berat_terima: row.try_get("berat_terima").map_err(storage_error)?,
        harga_per_kg: row.try_get("harga_per_kg").map_err(storage_error)?,
        pph_rate: row.try_get("pph_rate").map_err(storage_error)?,
        upah_bongkar_per_kg: row.try_get("upah_bongkar_per_kg").map_err(storage_error)?,
        total: row.try_get("total").map_err(storage_error)?,
        total_pph: row.try_get("total_pph").map_err(storage_error)?,
        total_upah_bongkar: row.try_get("total_upah_bongkar").map_err(storage_error)?,
        total_pembayaran_supplier: row
            .try_get("total_pembayaran_supplier")
            .map_err(storage_error)?,
        status: text(row, "status")?,
        warehouse_id: row.try_get("warehouse_id").map_err(storage_error)?,
        approved_by_id: row.try_get("approved_by_id").map_err(storage_error)?,
        approved_at: row.try_get("approved_at").map_err(storage_error)?,
        purchase_je_id: row.try_get("purchase_je_id").map_err(storage_error)?,
        unload_je_id: row.try_get("unload_je_id").map_err(storage_error)?,
        created_by_id: row.try_get("created_by_id").map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
    })
}

fn push_account_filter(builder: &mut QueryBuilder<'static, Postgres>, filter: &AccountFilter) {
    builder.push(" WHERE company_id = ").push_bind(filter.company_id);
    if let Some(class) = filter.class {
        builder.push(" AND class = ").push_bind(class.as_str());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(is_posting) = filter.is_posting {
        builder.push(" AND is_posting = ").push_bind(is_posting);
    }
    let search = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(search) = search {
        let pattern = format!("%{}%", search.to_lowercase());
        builder
            .push(" AND (lower(code) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR lower(name) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

impl PgLedgerTx {
    async fn entry_lines(
        &mut self,
        entry_ids: &[Uuid],
    ) -> CoreResult<HashMap<Uuid, Vec<JournalLine>>> {
        let rows = sqlx::query(
            "SELECT entry_id, id, account_id, debit, credit, cost_center, dept, item_id, \
             warehouse_id, description
             FROM journal_lines WHERE entry_id = ANY($1) ORDER BY entry_id, line_no",
        )
        .bind(entry_ids.to_vec())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(storage_error)?;

        let mut grouped: HashMap<Uuid, Vec<JournalLine>> = HashMap::new();
        for row in &rows {
            let entry_id: Uuid = row.try_get("entry_id").map_err(storage_error)?;
            grouped.entry(entry_id).or_default().push(journal_line_from_row(row)?);
        }
        Ok(grouped)
    }

    async fn entries_with_lines(&mut self, rows: Vec<PgRow>) -> CoreResult<Vec<JournalEntry>> {
        let mut entries = rows
            .iter()
            .map(entry_from_row)
            .collect::<CoreResult<Vec<_>>>()?;
        let ids: Vec<Uuid> = entries.iter().map(|entry| entry.id).collect();
        let mut lines = self.entry_lines(&ids).await?;
        for entry in &mut entries {
            entry.lines = lines.remove(&entry.id).unwrap_or_default();
        }
        Ok(entries)
    }

    async fn select_entry(
        &mut self,
        id: Uuid,
        for_update: bool,
    ) -> CoreResult<Option<JournalEntry>> {
        let lock = if for_update { " FOR UPDATE" } else { "" };
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE id = $1{lock}"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        match row {
            Some(row) => Ok(self.entries_with_lines(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn select_document(
        &mut self,
        id: Uuid,
        for_update: bool,
    ) -> CoreResult<Option<StockDocument>> {
        let lock = if for_update { " FOR UPDATE" } else { "" };
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM stock_documents WHERE id = $1{lock}"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut document = document_from_row(&row)?;
        let lines = sqlx::query(
            "SELECT id, item_id, item_category, bin_id, ledger_type, qty, unit_cost, amount, \
             account_id, cost_center, loan_issue_line_id, note
             FROM stock_document_lines WHERE document_id = $1 ORDER BY line_no",
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        document.lines = lines
            .iter()
            .map(document_line_from_row)
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Some(document))
    }

    async fn select_ticket(
        &mut self,
        id: Uuid,
        for_update: bool,
    ) -> CoreResult<Option<WeighbridgeTicket>> {
        let lock = if for_update { " FOR UPDATE" } else { "" };
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM weighbridge_tickets WHERE id = $1{lock}"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        row.as_ref().map(ticket_from_row).transpose()
    }

    async fn numbers_with_prefix(
        &mut self,
        sql: &str,
        company_id: Uuid,
        window: &str,
    ) -> CoreResult<Vec<String>> {
        let rows = sqlx::query(sql)
            .bind(company_id)
            .bind(window)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(storage_error))
            .collect()
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn commit(self) -> CoreResult<()> {
        self.tx.commit().await.map_err(storage_error)
    }

    async fn allocate_sequence(&mut self, scope: &str, floor: i64) -> CoreResult<i64> {
        let row = sqlx::query(
            "INSERT INTO number_sequences (scope, value) VALUES ($1, $2 + 1)
             ON CONFLICT (scope)
             DO UPDATE SET value = GREATEST(number_sequences.value, $2) + 1
             RETURNING value",
        )
        .bind(scope)
        .bind(floor)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        row.try_get("value").map_err(storage_error)
    }

    async fn find_account(&mut self, id: Uuid) -> CoreResult<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_account_by_code(
        &mut self,
        company_id: Uuid,
        code: &str,
    ) -> CoreResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE company_id = $1 AND code = $2"
        ))
        .bind(company_id)
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn list_accounts(&mut self, company_id: Uuid) -> CoreResult<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE company_id = $1 ORDER BY code"
        ))
        .bind(company_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        rows.iter().map(account_from_row).collect()
    }

    async fn page_accounts(&mut self, filter: &AccountFilter) -> CoreResult<Page<Account>> {
        let per_page = if filter.per_page == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            filter.per_page
        };
        let page = filter.page.max(1);

        let mut counting = QueryBuilder::new("SELECT COUNT(*) FROM accounts");
        push_account_filter(&mut counting, filter);
        let total = counting
            .build()
            .fetch_one(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        let total = count(&total)?;

        let mut listing = QueryBuilder::new(format!("SELECT {ACCOUNT_COLUMNS} FROM accounts"));
        push_account_filter(&mut listing, filter);
        listing
            .push(" ORDER BY code LIMIT ")
            .push_bind(i64::from(per_page))
            .push(" OFFSET ")
            .push_bind(i64::from(page - 1).saturating_mul(i64::from(per_page)));
        let rows = listing
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage_error)?;

        Ok(Page {
            items: rows.iter().map(account_from_row).collect::<CoreResult<_>>()?,
            total,
            page,
            per_page,
        })
    }

    async fn insert_account(&mut self, account: &Account) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO accounts (id, company_id, code, name, class, normal_side, is_posting, \
             parent_id, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(account.id)
        .bind(account.company_id)
        .bind(&account.code)
        .bind(&account.name)
        .bind(account.class.as_str())
        .bind(account.normal_side.as_str())
        .bind(account.is_posting)
        .bind(account.parent_id)
        .bind(account.status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|err| match unique_violation(&err) {
            Some(_) => CoreError::DuplicateCode(account.code.clone()),
            None => storage_error(err),
        })?;
        Ok(())
    }

    async fn update_account(&mut self, account: &Account) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE accounts SET code = $2, name = $3, class = $4, normal_side = $5, \
             is_posting = $6, parent_id = $7, status = $8
             WHERE id = $1",
        )
        .bind(account.id)
        .bind(&account.code)
        .bind(&account.name)
        .bind(account.class.as_str())
        .bind(account.normal_side.as_str())
        .bind(account.is_posting)
        .bind(account.parent_id)
        .bind(account.status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|err| match unique_violation(&err) {
            Some(_) => CoreError::DuplicateCode(account.code.clone()),
            None => storage_error(err),
        })?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("account", account.id));
        }
        Ok(())
    }

    async fn delete_account(&mut self, id: Uuid) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("account", id));
        }
        Ok(())
    }

    async fn count_child_accounts(&mut self, id: Uuid) -> CoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) FROM accounts WHERE parent_id = $1")
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        count(&row)
    }

    async fn count_account_lines(&mut self, id: Uuid) -> CoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) FROM journal_lines WHERE account_id = $1")
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        count(&row)
    }

    async fn upsert_system_account(&mut self, mapping: &SystemAccountMapping) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO system_account_map (company_id, key, account_id) VALUES ($1, $2, $3)
             ON CONFLICT (company_id, key) DO UPDATE SET account_id = EXCLUDED.account_id",
        )
        .bind(mapping.company_id)
        .bind(mapping.key.as_str())
        .bind(mapping.account_id)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn find_system_account(
        &mut self,
        company_id: Uuid,
        key: SystemAccountKey,
    ) -> CoreResult<Option<Uuid>> {
        let row = sqlx::query(
            "SELECT account_id FROM system_account_map WHERE company_id = $1 AND key = $2",
        )
        .bind(company_id)
        .bind(key.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        row.map(|row| row.try_get("account_id").map_err(storage_error))
            .transpose()
    }

    async fn list_system_accounts(
        &mut self,
        company_id: Uuid,
    ) -> CoreResult<Vec<SystemAccountMapping>> {
        let rows = sqlx::query(
            "SELECT company_id, key, account_id FROM system_account_map WHERE company_id = $1",
        )
        .bind(company_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        let mut mappings = rows
            .iter()
            .map(|row| {
                Ok(SystemAccountMapping {
                    company_id: row.try_get("company_id").map_err(storage_error)?,
                    key: text(row, "key")?,
                    account_id: row.try_get("account_id").map_err(storage_error)?,
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;
        mappings.sort_by_key(|mapping| mapping.key);
        Ok(mappings)
    }

    async fn count_system_account_refs(&mut self, account_id: Uuid) -> CoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) FROM system_account_map WHERE account_id = $1")
            .bind(account_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        count(&row)
    }

    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO journal_entries (id, company_id, entry_number, date, source_type, \
             source_id, memo, status, posted_at, posted_by_id, created_by_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(entry.id)
        .bind(entry.company_id)
        .bind(&entry.entry_number)
        .bind(entry.date)
        .bind(entry.source_type.as_str())
        .bind(entry.source_id)
        .bind(&entry.memo)
        .bind(entry.status.as_str())
        .bind(entry.posted_at)
        .bind(entry.posted_by_id)
        .bind(entry.created_by_id)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| match unique_violation(&err) {
            Some(_) => CoreError::DuplicateEntryNumber(entry.entry_number.clone()),
            None => storage_error(err),
        })?;

        for (line_no, line) in (1_i32..).zip(&entry.lines) {
            sqlx::query(
                "INSERT INTO journal_lines (id, entry_id, line_no, account_id, debit, credit, \
                 cost_center, dept, item_id, warehouse_id, description)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(line.id)
            .bind(entry.id)
            .bind(line_no)
            .bind(line.account_id)
            .bind(line.debit)
            .bind(line.credit)
            .bind(&line.cost_center)
            .bind(&line.dept)
            .bind(line.item_id)
            .bind(line.warehouse_id)
            .bind(&line.description)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        }
        Ok(())
    }

    async fn find_journal_entry(&mut self, id: Uuid) -> CoreResult<Option<JournalEntry>> {
        self.select_entry(id, false).await
    }

    async fn lock_journal_entry(&mut self, id: Uuid) -> CoreResult<Option<JournalEntry>> {
        self.select_entry(id, true).await
    }

    async fn update_journal_entry(&mut self, entry: &JournalEntry) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE journal_entries SET memo = $2, status = $3, posted_at = $4, posted_by_id = $5
             WHERE id = $1",
        )
        .bind(entry.id)
        .bind(&entry.memo)
        .bind(entry.status.as_str())
        .bind(entry.posted_at)
        .bind(entry.posted_by_id)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("journal entry", entry.id));
        }
        Ok(())
    }

    async fn journal_entries_by_source(
        &mut self,
        source_type: SourceType,
        source_id: Uuid,
    ) -> CoreResult<Vec<JournalEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries
             WHERE source_type = $1 AND source_id = $2 ORDER BY entry_number"
        ))
        .bind(source_type.as_str())
        .bind(source_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        self.entries_with_lines(rows).await
    }

    async fn entry_numbers_in_window(
        &mut self,
        company_id: Uuid,
        window: &str,
    ) -> CoreResult<Vec<String>> {
        self.numbers_with_prefix(
            "SELECT entry_number FROM journal_entries
             WHERE company_id = $1 AND starts_with(entry_number, $2)",
            company_id,
            window,
        )
        .await
    }

    async fn posted_lines(&mut self, query: &LineQuery) -> CoreResult<Vec<PostedLine>> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT e.id AS entry_id, e.entry_number, e.date, e.source_type, e.memo, \
             l.account_id, l.debit, l.credit, l.description
             FROM journal_lines l JOIN journal_entries e ON e.id = l.entry_id
             WHERE e.status = 'POSTED' AND e.company_id = ",
        );
        builder.push_bind(query.company_id);
        if let Some(account_id) = query.account_id {
            builder.push(" AND l.account_id = ").push_bind(account_id);
        }
        if let Some(from) = query.from {
            builder.push(" AND e.date >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            builder.push(" AND e.date <= ").push_bind(to);
        }
        if let Some(before) = query.before {
            builder.push(" AND e.date < ").push_bind(before);
        }
        builder.push(" ORDER BY e.date, e.entry_number, l.line_no");

        let rows = builder
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        rows.iter()
            .map(|row| {
                Ok(PostedLine {
                    entry_id: row.try_get("entry_id").map_err(storage_error)?,
                    entry_number: row.try_get("entry_number").map_err(storage_error)?,
                    date: row.try_get("date").map_err(storage_error)?,
                    source_type: text(row, "source_type")?,
                    memo: row.try_get("memo").map_err(storage_error)?,
                    account_id: row.try_get("account_id").map_err(storage_error)?,
                    debit: row.try_get("debit").map_err(storage_error)?,
                    credit: row.try_get("credit").map_err(storage_error)?,
                    description: row.try_get("description").map_err(storage_error)?,
                })
            })
            .collect()
    }

    async fn upsert_opening_balance(&mut self, opening: &OpeningBalance) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO opening_balances (company_id, account_id, period_start, amount)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (company_id, account_id, period_start)
             DO UPDATE SET amount = EXCLUDED.amount",
        )
        .bind(opening.company_id)
        .bind(opening.account_id)
        .bind(opening.period_start)
        .bind(opening.amount)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn opening_balances(
        &mut self,
        company_id: Uuid,
        on: NaiveDate,
    ) -> CoreResult<Vec<OpeningBalance>> {
        let rows = sqlx::query(
            "SELECT DISTINCT ON (account_id) company_id, account_id, period_start, amount
             FROM opening_balances
             WHERE company_id = $1 AND period_start <= $2
             ORDER BY account_id, period_start DESC",
        )
        .bind(company_id)
        .bind(on)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        rows.iter()
            .map(|row| {
                Ok(OpeningBalance {
                    company_id: row.try_get("company_id").map_err(storage_error)?,
                    account_id: row.try_get("account_id").map_err(storage_error)?,
                    period_start: row.try_get("period_start").map_err(storage_error)?,
                    amount: row.try_get("amount").map_err(storage_error)?,
                })
            })
            .collect()
    }

    async fn find_stock_balance(
        &mut self,
        item_id: Uuid,
        warehouse_id: Uuid,
        bin_id: &str,
    ) -> CoreResult<Option<StockBalance>> {
        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM stock_balances
             WHERE item_id = $1 AND warehouse_id = $2 AND bin_id = $3"
        ))
        .bind(item_id)
        .bind(warehouse_id)
        .bind(bin_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        row.as_ref().map(balance_from_row).transpose()
    }

    async fn lock_stock_balance(
        &mut self,
        item_id: Uuid,
        warehouse_id: Uuid,
        bin_id: &str,
    ) -> CoreResult<StockBalance> {
        sqlx::query(
            "INSERT INTO stock_balances (item_id, warehouse_id, bin_id) VALUES ($1, $2, $3)
             ON CONFLICT (item_id, warehouse_id, bin_id) DO NOTHING",
        )
        .bind(item_id)
        .bind(warehouse_id)
        .bind(bin_id)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;

        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM stock_balances
             WHERE item_id = $1 AND warehouse_id = $2 AND bin_id = $3
             FOR UPDATE"
        ))
        .bind(item_id)
        .bind(warehouse_id)
        .bind(bin_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        balance_from_row(&row)
    }

    async fn save_stock_balance(&mut self, balance: &StockBalance) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO stock_balances (item_id, warehouse_id, bin_id, qty_on_hand, avg_cost, \
             version, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, now())
             ON CONFLICT (item_id, warehouse_id, bin_id) DO UPDATE SET
                 qty_on_hand = EXCLUDED.qty_on_hand,
                 avg_cost = EXCLUDED.avg_cost,
                 version = EXCLUDED.version,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(balance.item_id)
        .bind(balance.warehouse_id)
        .bind(&balance.bin_id)
        .bind(balance.qty_on_hand)
        .bind(balance.avg_cost)
        .bind(balance.version)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn append_stock_ledger(&mut self, entry: &StockLedgerEntry) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO stock_ledger (id, item_id, warehouse_id, bin_id, ledger_type, qty, \
             before_qty, after_qty, unit_cost, ref_table, ref_id, note, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(entry.id)
        .bind(entry.item_id)
        .bind(entry.warehouse_id)
        .bind(&entry.bin_id)
        .bind(entry.ledger_type.as_str())
        .bind(entry.qty)
        .bind(entry.before_qty)
        .bind(entry.after_qty)
        .bind(entry.unit_cost)
        .bind(&entry.ref_table)
        .bind(entry.ref_id)
        .bind(&entry.note)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn stock_ledger(
        &mut self,
        query: &StockLedgerQuery,
    ) -> CoreResult<Vec<StockLedgerEntry>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {LEDGER_COLUMNS} FROM stock_ledger WHERE TRUE"
        ));
        if let Some(item_id) = query.item_id {
            builder.push(" AND item_id = ").push_bind(item_id);
        }
        if let Some(warehouse_id) = query.warehouse_id {
            builder.push(" AND warehouse_id = ").push_bind(warehouse_id);
        }
        if let Some(ref_table) = &query.ref_table {
            builder.push(" AND ref_table = ").push_bind(ref_table.clone());
        }
        if let Some(ref_id) = query.ref_id {
            builder.push(" AND ref_id = ").push_bind(ref_id);
        }
        builder.push(" ORDER BY seq");

        let rows = builder
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        rows.iter().map(ledger_entry_from_row).collect()
    }

    async fn stock_valuation(&mut self, warehouse_id: Option<Uuid>) -> CoreResult<Decimal> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(qty_on_hand * avg_cost), 0) AS value FROM stock_balances
             WHERE $1::uuid IS NULL OR warehouse_id = $1",
        )
        .bind(warehouse_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        row.try_get("value").map_err(storage_error)
    }

    async fn insert_stock_document(&mut self, document: &StockDocument) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO stock_documents (id, company_id, kind, number, date, warehouse_id, \
             receipt_source, counterparty, item_request_id, memo, status, journal_entry_id, \
             created_by_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(document.id)
        .bind(document.company_id)
        .bind(document.kind.as_str())
        .bind(&document.number)
        .bind(document.date)
        .bind(document.warehouse_id)
        .bind(document.receipt_source.map(|source| source.as_str()))
        .bind(&document.counterparty)
        .bind(document.item_request_id)
        .bind(&document.memo)
        .bind(document.status.as_str())
        .bind(document.journal_entry_id)
        .bind(document.created_by_id)
        .bind(document.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| match unique_violation(&err) {
            Some(_) => CoreError::Storage(format!(
                "document number {} already exists",
                document.number
            )),
            None => storage_error(err),
        })?;

        for (line_no, line) in (1_i32..).zip(&document.lines) {
            sqlx::query(
                "INSERT INTO stock_document_lines (id, document_id, line_no, item_id, \
                 item_category, bin_id, ledger_type, qty, unit_cost, amount, account_id, \
                 cost_center, loan_issue_line_id, note)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            )
            .bind(line.id)
            .bind(document.id)
            .bind(line_no)
            .bind(line.item_id)
            .bind(line.item_category.as_str())
            .bind(&line.bin_id)
            .bind(line.ledger_type.as_str())
            .bind(line.qty)
            .bind(line.unit_cost)
            .bind(line.amount)
            .bind(line.account_id)
            .bind(&line.cost_center)
            .bind(line.loan_issue_line_id)
            .bind(&line.note)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        }
        Ok(())
    }

    async fn lock_stock_document(&mut self, id: Uuid) -> CoreResult<Option<StockDocument>> {
        self.select_document(id, true).await
    }

    async fn find_stock_document(&mut self, id: Uuid) -> CoreResult<Option<StockDocument>> {
        self.select_document(id, false).await
    }

    async fn update_stock_document(&mut self, document: &StockDocument) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE stock_documents SET memo = $2, status = $3, journal_entry_id = $4
             WHERE id = $1",
        )
        .bind(document.id)
        .bind(&document.memo)
        .bind(document.status.as_str())
        .bind(document.journal_entry_id)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("stock document", document.id));
        }
        Ok(())
    }

    async fn document_numbers_in_window(
        &mut self,
        company_id: Uuid,
        window: &str,
    ) -> CoreResult<Vec<String>> {
        self.numbers_with_prefix(
            "SELECT number FROM stock_documents
             WHERE company_id = $1 AND starts_with(number, $2)
             UNION ALL
             SELECT number FROM item_requests
             WHERE company_id = $1 AND starts_with(number, $2)",
            company_id,
            window,
        )
        .await
    }

    async fn find_stock_document_line(
        &mut self,
        line_id: Uuid,
    ) -> CoreResult<Option<(StockDocument, StockDocumentLine)>> {
        let row = sqlx::query("SELECT document_id FROM stock_document_lines WHERE id = $1")
            .bind(line_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let document_id: Uuid = row.try_get("document_id").map_err(storage_error)?;
        let Some(document) = self.select_document(document_id, false).await? else {
            return Ok(None);
        };
        let line = document.lines.iter().find(|line| line.id == line_id).cloned();
        Ok(line.map(|line| (document, line)))
    }

    async fn returned_loan_qty(&mut self, loan_issue_line_id: Uuid) -> CoreResult<Decimal> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(l.qty), 0) AS returned
             FROM stock_document_lines l
             JOIN stock_documents d ON d.id = l.document_id
             WHERE l.loan_issue_line_id = $1
               AND d.kind = 'LOAN_RETURN'
               AND d.status = 'POSTED'",
        )
        .bind(loan_issue_line_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        row.try_get("returned").map_err(storage_error)
    }

    async fn insert_item_request(&mut self, request: &ItemRequest) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO item_requests (id, company_id, number, date, warehouse_id, department, \
             status, requested_by_id, decided_by_id, decision_note, goods_issue_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(request.id)
        .bind(request.company_id)
        .bind(&request.number)
        .bind(request.date)
        .bind(request.warehouse_id)
        .bind(&request.department)
        .bind(request.status.as_str())
        .bind(request.requested_by_id)
        .bind(request.decided_by_id)
        .bind(&request.decision_note)
        .bind(request.goods_issue_id)
        .bind(request.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;

        for (line_no, line) in (1_i32..).zip(&request.lines) {
            sqlx::query(
                "INSERT INTO item_request_lines (id, request_id, line_no, item_id, \
                 item_category, qty, note)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(line.id)
            .bind(request.id)
            .bind(line_no)
            .bind(line.item_id)
            .bind(line.item_category.as_str())
            .bind(line.qty)
            .bind(&line.note)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        }
        Ok(())
    }

    async fn lock_item_request(&mut self, id: Uuid) -> CoreResult<Option<ItemRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM item_requests WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut request = request_from_row(&row)?;
        let lines = sqlx::query(
            "SELECT id, item_id, item_category, qty, note
             FROM item_request_lines WHERE request_id = $1 ORDER BY line_no",
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        request.lines = lines
            .iter()
            .map(|row| {
                Ok(ItemRequestLine {
                    id: row.try_get("id").map_err(storage_error)?,
                    item_id: row.try_get("item_id").map_err(storage_error)?,
                    item_category: text(row, "item_category")?,
                    qty: row.try_get("qty").map_err(storage_error)?,
                    note: row.try_get("note").map_err(storage_error)?,
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Some(request))
    }

    async fn update_item_request(&mut self, request: &ItemRequest) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE item_requests SET status = $2, decided_by_id = $3, decision_note = $4, \
             goods_issue_id = $5
             WHERE id = $1",
        )
        .bind(request.id)
        .bind(request.status.as_str())
        .bind(request.decided_by_id)
        .bind(&request.decision_note)
        .bind(request.goods_issue_id)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("item request", request.id));
        }
        Ok(())
    }

    async fn insert_ticket(&mut self, ticket: &WeighbridgeTicket) -> CoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO weighbridge_tickets ({TICKET_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30)"
        ))
        .bind(ticket.id)
        .bind(ticket.company_id)
        .bind(&ticket.no_seri)
        .bind(ticket.vehicle_id)
        .bind(ticket.supplier_id)
        .bind(ticket.item_id)
        .bind(ticket.tanggal)
        .bind(ticket.jam_masuk)
        .bind(ticket.jam_keluar)
        .bind(ticket.timbang1)
        .bind(ticket.timbang2)
        .bind(ticket.netto1)
        .bind(ticket.pot_percent)
        .bind(ticket.pot_kg)
        .bind(ticket.berat_terima)
        .bind(ticket.harga_per_kg)
        .bind(ticket.pph_rate)
        .bind(ticket.upah_bongkar_per_kg)
        .bind(ticket.total)
        .bind(ticket.total_pph)
        .bind(ticket.total_upah_bongkar)
        .bind(ticket.total_pembayaran_supplier)
        .bind(ticket.status.as_str())
        .bind(ticket.warehouse_id)
        .bind(ticket.approved_by_id)
        .bind(ticket.approved_at)
        .bind(ticket.purchase_je_id)
        .bind(ticket.unload_je_id)
        .bind(ticket.created_by_id)
        .bind(ticket.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| match unique_violation(&err) {
            Some(_) => CoreError::DuplicateTicketNumber(ticket.no_seri.clone()),
            None => storage_error(err),
        })?;
        Ok(())
    }

    async fn find_ticket(&mut self, id: Uuid) -> CoreResult<Option<WeighbridgeTicket>> {
        self.select_ticket(id, false).await
    }

    async fn lock_ticket(&mut self, id: Uuid) -> CoreResult<Option<WeighbridgeTicket>> {
        self.select_ticket(id, true).await
    }

    async fn update_ticket(&mut self, ticket: &WeighbridgeTicket) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE weighbridge_tickets SET
                 jam_keluar = $2, timbang1 = $3, timbang2 = $4, netto1 = $5, pot_percent = $6,
                 pot_kg = $7, berat_terima = $8, harga_per_kg = $9, pph_rate = $10,
                 upah_bongkar_per_kg = $11, total = $12, total_pph = $13,
                 total_upah_bongkar = $14, total_pembayaran_supplier = $15, status = $16,
                 warehouse_id = $17, approved_by_id = $18, approved_at = $19,
                 purchase_je_id = $20, unload_je_id = $21
             WHERE id = $1",
        )
        .bind(ticket.id)
        .bind(ticket.jam_keluar)
        .bind(ticket.timbang1)
        .bind(ticket.timbang2)
        .bind(ticket.netto1)
        .bind(ticket.pot_percent)
        .bind(ticket.pot_kg)
        .bind(ticket.berat_terima)
        .bind(ticket.harga_per_kg)
        .bind(ticket.pph_rate)
        .bind(ticket.upah_bongkar_per_kg)
        .bind(ticket.total)
        .bind(ticket.total_pph)
        .bind(ticket.total_upah_bongkar)
        .bind(ticket.total_pembayaran_supplier)
        .bind(ticket.status.as_str())
        .bind(ticket.warehouse_id)
        .bind(ticket.approved_by_id)
        .bind(ticket.approved_at)
        .bind(ticket.purchase_je_id)
        .bind(ticket.unload_je_id)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("weighbridge ticket", ticket.id));
        }
        Ok(())
    }

    async fn list_tickets(&mut self, filter: &TicketFilter) -> CoreResult<Vec<WeighbridgeTicket>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {TICKET_COLUMNS} FROM weighbridge_tickets WHERE company_id = "
        ));
        builder.push_bind(filter.company_id);
        if let Some(from) = filter.from {
            builder.push(" AND tanggal >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            builder.push(" AND tanggal <= ").push_bind(to);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(supplier_id) = filter.supplier_id {
            builder.push(" AND supplier_id = ").push_bind(supplier_id);
        }
        builder.push(" ORDER BY tanggal, no_seri");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = builder
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(storage_error)?;
        rows.iter().map(ticket_from_row).collect()
    }

    async fn ticket_numbers_in_window(
        &mut self,
        company_id: Uuid,
        window: &str,
    ) -> CoreResult<Vec<String>> {
        self.numbers_with_prefix(
            "SELECT no_seri FROM weighbridge_tickets
             WHERE company_id = $1 AND starts_with(no_seri, $2)",
            company_id,
            window,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_storage_failures() {
        let err = storage_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, CoreError::Storage(_)));
        assert!(unique_violation(&sqlx::Error::RowNotFound).is_none());
    }
}
