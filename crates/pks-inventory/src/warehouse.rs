//! Warehouse documents: every create moves stock and books the matching
//! journal entry in the caller's transaction, so a failing line aborts the
//! whole document.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, Utc};
use pks_core::{
    Actor, CoreError, CoreResult, DocumentKind, DocumentStatus, ItemCategory, ItemRequest,
    ItemRequestLine, ItemRequestStatus, LedgerTx, LedgerType, NO_BIN, NumberSeries,
    ReceiptSource, Role, SourceType, StockDocument, StockDocumentLine, StockLedgerQuery,
    SystemAccountKey, extend,
};
use pks_finance::{JournalLineInput, NewJournalEntry, journal, system_accounts};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::{self, StockMove};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLineInput {
    pub item_id: Uuid,
    pub item_category: ItemCategory,
    pub bin_id: Option<String>,
    pub qty: Decimal,
    pub unit_cost: Decimal,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceiptInput {
    pub company_id: Uuid,
    pub date: NaiveDate,
    pub warehouse_id: Uuid,
    pub source: ReceiptSource,
    pub counterparty: Option<String>,
    pub memo: Option<String>,
    pub lines: Vec<ReceiptLineInput>,
    /// Stamped from the acting user, never read from a request body.
    #[serde(skip_deserializing)]
    pub created_by_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLineInput {
    pub item_id: Uuid,
    pub item_category: ItemCategory,
    pub bin_id: Option<String>,
    pub qty: Decimal,
    /// Expense or cost account to charge; `GENERAL_EXPENSE` when absent.
    pub expense_account_id: Option<Uuid>,
    pub cost_center: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsIssueInput {
    pub company_id: Uuid,
    pub date: NaiveDate,
    pub warehouse_id: Uuid,
    pub item_request_id: Option<Uuid>,
    pub memo: Option<String>,
    pub lines: Vec<IssueLineInput>,
    #[serde(skip_deserializing)]
    pub created_by_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanLineInput {
    pub item_id: Uuid,
    pub item_category: ItemCategory,
    pub bin_id: Option<String>,
    pub qty: Decimal,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanIssueInput {
    pub company_id: Uuid,
    pub date: NaiveDate,
    pub warehouse_id: Uuid,
    pub borrower: String,
    pub memo: Option<String>,
    pub lines: Vec<LoanLineInput>,
    #[serde(skip_deserializing)]
    pub created_by_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanReturnLineInput {
    pub loan_issue_line_id: Uuid,
    pub bin_id: Option<String>,
    pub qty: Decimal,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanReturnInput {
    pub company_id: Uuid,
    pub date: NaiveDate,
    pub warehouse_id: Uuid,
    pub memo: Option<String>,
    pub lines: Vec<LoanReturnLineInput>,
    #[serde(skip_deserializing)]
    pub created_by_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLineInput {
    pub item_id: Uuid,
    pub item_category: ItemCategory,
    pub bin_id: Option<String>,
    pub counted_qty: Decimal,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCountInput {
    pub company_id: Uuid,
    pub date: NaiveDate,
    pub warehouse_id: Uuid,
    pub memo: Option<String>,
    pub lines: Vec<CountLineInput>,
    #[serde(skip_deserializing)]
    pub created_by_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequestLineInput {
    pub item_id: Uuid,
    pub item_category: ItemCategory,
    pub qty: Decimal,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItemRequest {
    pub company_id: Uuid,
    pub date: NaiveDate,
    pub warehouse_id: Uuid,
    pub department: Option<String>,
    pub lines: Vec<ItemRequestLineInput>,
    /// Stamped from the acting user, never read from a request body.
    #[serde(skip_deserializing)]
    pub requested_by_id: Uuid,
}

/// How an approved request is turned into its goods issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfilItemRequest {
    pub date: NaiveDate,
    pub bin_id: Option<String>,
    pub expense_account_id: Option<Uuid>,
    pub cost_center: Option<String>,
}

/// System accounts resolved once per document.
struct AccountMap {
    company_id: Uuid,
    resolved: HashMap<SystemAccountKey, Uuid>,
}

impl AccountMap {
    fn new(company_id: Uuid) -> Self {
        Self {
            company_id,
            resolved: HashMap::new(),
        }
    }

    async fn get<T: LedgerTx>(&mut self, tx: &mut T, key: SystemAccountKey) -> CoreResult<Uuid> {
        if let Some(account_id) = self.resolved.get(&key) {
            return Ok(*account_id);
        }
        let account_id = system_accounts::get(tx, self.company_id, key).await?;
        self.resolved.insert(key, account_id);
        Ok(account_id)
    }
}

pub async fn create_goods_receipt<T: LedgerTx>(
    tx: &mut T,
    input: GoodsReceiptInput,
) -> CoreResult<StockDocument> {
    require_lines(input.lines.len())?;
    for line in &input.lines {
        require_positive(line.qty)?;
        if line.unit_cost < Decimal::ZERO {
            return Err(CoreError::validation("unit cost cannot be negative"));
        }
    }

    let mut accounts = AccountMap::new(input.company_id);
    let credit_account = accounts.get(tx, receipt_credit_key(input.source)).await?;
    for line in &input.lines {
        accounts.get(tx, line.item_category.inventory_key()).await?;
    }

    let kind = DocumentKind::GoodsReceipt;
    let mut document = open_document(
        tx,
        kind,
        input.company_id,
        input.date,
        input.warehouse_id,
        input.memo,
        input.created_by_id,
    )
    .await?;
    document.receipt_source = Some(input.source);
    document.counterparty = input.counterparty;

    let mut journal_lines = Vec::with_capacity(input.lines.len() + 1);
    for line in input.lines {
        let movement = StockMove::new(
            line.item_id,
            input.warehouse_id,
            line.bin_id.as_deref(),
            line.qty,
            LedgerType::InReceipt,
            kind.ref_table(),
            document.id,
        )
        .with_note(line.note.clone());
        let entry = ledger::record_inbound(tx, movement, line.unit_cost).await?;

        let inventory = accounts.get(tx, line.item_category.inventory_key()).await?;
        let amount = extend(line.qty, entry.unit_cost);
        journal_lines.push(
            JournalLineInput::debit(inventory, amount).with_item(line.item_id, input.warehouse_id),
        );
        document.lines.push(StockDocumentLine {
            id: Uuid::new_v4(),
            item_id: line.item_id,
            item_category: line.item_category,
            bin_id: entry.bin_id,
            ledger_type: LedgerType::InReceipt,
            qty: line.qty,
            unit_cost: entry.unit_cost,
            amount,
            account_id: Some(inventory),
            cost_center: None,
            loan_issue_line_id: None,
            note: line.note,
        });
    }
    journal_lines.push(JournalLineInput::credit(credit_account, document.total_amount()));

    finish_document(tx, document, SourceType::GoodsReceipt, journal_lines).await
}

/// Issues stock to consumption. Amounts are valued at the average cost on
/// hand when the line is issued; no price is accepted from the caller.
pub async fn create_goods_issue<T: LedgerTx>(
    tx: &mut T,
    input: GoodsIssueInput,
) -> CoreResult<StockDocument> {
    require_lines(input.lines.len())?;
    for line in &input.lines {
        require_positive(line.qty)?;
    }

    let mut accounts = AccountMap::new(input.company_id);
    for line in &input.lines {
        accounts.get(tx, line.item_category.inventory_key()).await?;
        if line.expense_account_id.is_none() {
            accounts.get(tx, SystemAccountKey::GeneralExpense).await?;
        }
    }

    let kind = DocumentKind::GoodsIssue;
    let mut document = open_document(
        tx,
        kind,
        input.company_id,
        input.date,
        input.warehouse_id,
        input.memo,
        input.created_by_id,
    )
    .await?;
    document.item_request_id = input.item_request_id;

    let mut journal_lines = Vec::with_capacity(input.lines.len() * 2);
    for line in input.lines {
        let movement = StockMove::new(
            line.item_id,
            input.warehouse_id,
            line.bin_id.as_deref(),
            line.qty,
            LedgerType::OutIssue,
            kind.ref_table(),
            document.id,
        )
        .with_note(line.note.clone());
        let entry = ledger::record_outbound(tx, movement).await?;

        let expense = match line.expense_account_id {
            Some(account_id) => account_id,
            None => accounts.get(tx, SystemAccountKey::GeneralExpense).await?,
        };
        let inventory = accounts.get(tx, line.item_category.inventory_key()).await?;
        let amount = extend(line.qty, entry.unit_cost);
        journal_lines.push(
            JournalLineInput::debit(expense, amount)
                .with_item(line.item_id, input.warehouse_id)
                .with_cost_center(line.cost_center.clone()),
        );
        journal_lines.push(
            JournalLineInput::credit(inventory, amount).with_item(line.item_id, input.warehouse_id),
        );
        document.lines.push(StockDocumentLine {
            id: Uuid::new_v4(),
            item_id: line.item_id,
            item_category: line.item_category,
            bin_id: entry.bin_id,
            ledger_type: LedgerType::OutIssue,
            qty: line.qty,
            unit_cost: entry.unit_cost,
            amount,
            account_id: Some(expense),
            cost_center: line.cost_center,
            loan_issue_line_id: None,
            note: line.note,
        });
    }

    finish_document(tx, document, SourceType::GoodsIssue, journal_lines).await
}

/// Lends stock out: moves it to the loan receivable instead of expensing it.
pub async fn create_loan_issue<T: LedgerTx>(
    tx: &mut T,
    input: LoanIssueInput,
) -> CoreResult<StockDocument> {
    require_lines(input.lines.len())?;
    let borrower = input.borrower.trim();
    if borrower.is_empty() {
        return Err(CoreError::validation("borrower is required for a loan issue"));
    }
    for line in &input.lines {
        require_positive(line.qty)?;
    }

    let mut accounts = AccountMap::new(input.company_id);
    let receivable = accounts
        .get(tx, SystemAccountKey::InventoryLoanReceivable)
        .await?;
    for line in &input.lines {
        accounts.get(tx, line.item_category.inventory_key()).await?;
    }

    let kind = DocumentKind::LoanIssue;
    let mut document = open_document(
        tx,
        kind,
        input.company_id,
        input.date,
        input.warehouse_id,
        input.memo,
        input.created_by_id,
    )
    .await?;
    document.counterparty = Some(borrower.to_string());

    let mut journal_lines = Vec::with_capacity(input.lines.len() * 2);
    for line in input.lines {
        let movement = StockMove::new(
            line.item_id,
            input.warehouse_id,
            line.bin_id.as_deref(),
            line.qty,
            LedgerType::OutLoan,
            kind.ref_table(),
            document.id,
        )
        .with_note(line.note.clone());
        let entry = ledger::record_outbound(tx, movement).await?;

        let inventory = accounts.get(tx, line.item_category.inventory_key()).await?;
        let amount = extend(line.qty, entry.unit_cost);
        journal_lines.push(
            JournalLineInput::debit(receivable, amount).with_item(line.item_id, input.warehouse_id),
        );
        journal_lines.push(
            JournalLineInput::credit(inventory, amount).with_item(line.item_id, input.warehouse_id),
        );
        document.lines.push(StockDocumentLine {
            id: Uuid::new_v4(),
            item_id: line.item_id,
            item_category: line.item_category,
            bin_id: entry.bin_id,
            ledger_type: LedgerType::OutLoan,
            qty: line.qty,
            unit_cost: entry.unit_cost,
            amount,
            account_id: Some(receivable),
            cost_center: None,
            loan_issue_line_id: None,
            note: line.note,
        });
    }

    finish_document(tx, document, SourceType::LoanIssue, journal_lines).await
}

/// Takes loaned stock back at the unit cost it left with. The goods land in
/// the warehouse and bin named on the return, which may differ from where
/// they were issued.
pub async fn create_loan_return<T: LedgerTx>(
    tx: &mut T,
    input: LoanReturnInput,
) -> CoreResult<StockDocument> {
    require_lines(input.lines.len())?;

    let mut origins = Vec::with_capacity(input.lines.len());
    let mut claimed: HashMap<Uuid, Decimal> = HashMap::new();
    for line in &input.lines {
        require_positive(line.qty)?;
        let (issue, issued) = tx
            .find_stock_document_line(line.loan_issue_line_id)
            .await?
            .ok_or_else(|| CoreError::not_found("loan issue line", line.loan_issue_line_id))?;
        if issue.kind != DocumentKind::LoanIssue || issue.company_id != input.company_id {
            return Err(CoreError::validation(format!(
                "line {} is not a loan issue line of this company",
                line.loan_issue_line_id
            )));
        }
        if issue.status != DocumentStatus::Posted {
            return Err(CoreError::InvalidState(format!(
                "loan issue {} is cancelled",
                issue.number
            )));
        }

        let already = tx.returned_loan_qty(issued.id).await?;
        let pending = claimed.entry(issued.id).or_default();
        let outstanding = issued.qty - already - *pending;
        if line.qty > outstanding {
            return Err(CoreError::validation(format!(
                "return of {} exceeds the {} still outstanding on {}",
                line.qty, outstanding, issue.number
            )));
        }
        *pending += line.qty;

        if issue.warehouse_id != input.warehouse_id {
            warn!(
                loan_issue = %issue.number,
                issued_from = %issue.warehouse_id,
                returned_to = %input.warehouse_id,
                "loan returned to a different warehouse than it was issued from"
            );
        }
        origins.push(issued);
    }

    let mut accounts = AccountMap::new(input.company_id);
    let receivable = accounts
        .get(tx, SystemAccountKey::InventoryLoanReceivable)
        .await?;
    for issued in &origins {
        accounts.get(tx, issued.item_category.inventory_key()).await?;
    }

    let kind = DocumentKind::LoanReturn;
    let mut document = open_document(
        tx,
        kind,
        input.company_id,
        input.date,
        input.warehouse_id,
        input.memo,
        input.created_by_id,
    )
    .await?;

    let mut journal_lines = Vec::with_capacity(input.lines.len() * 2);
    for (line, issued) in input.lines.into_iter().zip(origins) {
        let movement = StockMove::new(
            issued.item_id,
            input.warehouse_id,
            line.bin_id.as_deref(),
            line.qty,
            LedgerType::InLoanReturn,
            kind.ref_table(),
            document.id,
        )
        .with_note(line.note.clone());
        let entry = ledger::record_inbound(tx, movement, issued.unit_cost).await?;

        let inventory = accounts.get(tx, issued.item_category.inventory_key()).await?;
        let amount = extend(line.qty, issued.unit_cost);
        journal_lines.push(
            JournalLineInput::debit(inventory, amount)
                .with_item(issued.item_id, input.warehouse_id),
        );
        journal_lines.push(
            JournalLineInput::credit(receivable, amount)
                .with_item(issued.item_id, input.warehouse_id),
        );
        document.lines.push(StockDocumentLine {
            id: Uuid::new_v4(),
            item_id: issued.item_id,
            item_category: issued.item_category,
            bin_id: entry.bin_id,
            ledger_type: LedgerType::InLoanReturn,
            qty: line.qty,
            unit_cost: issued.unit_cost,
            amount,
            account_id: Some(inventory),
            cost_center: None,
            loan_issue_line_id: Some(issued.id),
            note: line.note,
        });
    }

    finish_document(tx, document, SourceType::LoanReturn, journal_lines).await
}

/// Books a physical count. Differences are valued at the average cost and
/// posted against the adjustment gain or loss account.
pub async fn create_stock_adjustment<T: LedgerTx>(
    tx: &mut T,
    input: StockCountInput,
) -> CoreResult<StockDocument> {
    require_lines(input.lines.len())?;
    let mut locations = HashSet::new();
    for line in &input.lines {
        if line.counted_qty < Decimal::ZERO {
            return Err(CoreError::validation("counted quantity cannot be negative"));
        }
        let bin = line.bin_id.as_deref().unwrap_or(NO_BIN).trim().to_string();
        if !locations.insert((line.item_id, bin)) {
            return Err(CoreError::validation(format!(
                "item {} is counted twice in the same bin",
                line.item_id
            )));
        }
    }

    let mut accounts = AccountMap::new(input.company_id);
    let gain = accounts
        .get(tx, SystemAccountKey::InventoryAdjustmentGain)
        .await?;
    let loss = accounts
        .get(tx, SystemAccountKey::InventoryAdjustmentLoss)
        .await?;
    for line in &input.lines {
        accounts.get(tx, line.item_category.inventory_key()).await?;
    }

    let kind = DocumentKind::StockAdjustment;
    let mut document = open_document(
        tx,
        kind,
        input.company_id,
        input.date,
        input.warehouse_id,
        input.memo,
        input.created_by_id,
    )
    .await?;

    let mut journal_lines = Vec::with_capacity(input.lines.len() * 2);
    for line in input.lines {
        let Some(entry) = ledger::record_count_adjustment(
            tx,
            line.item_id,
            input.warehouse_id,
            line.bin_id.as_deref(),
            line.counted_qty,
            kind.ref_table(),
            document.id,
            line.note.clone(),
        )
        .await?
        else {
            continue;
        };

        let inventory = accounts.get(tx, line.item_category.inventory_key()).await?;
        let amount = extend(entry.qty, entry.unit_cost);
        let (debit, credit, counter) = if entry.ledger_type == LedgerType::CountDiffIn {
            (inventory, gain, gain)
        } else {
            (loss, inventory, loss)
        };
        journal_lines.push(
            JournalLineInput::debit(debit, amount).with_item(line.item_id, input.warehouse_id),
        );
        journal_lines.push(
            JournalLineInput::credit(credit, amount).with_item(line.item_id, input.warehouse_id),
        );
        document.lines.push(StockDocumentLine {
            id: Uuid::new_v4(),
            item_id: line.item_id,
            item_category: line.item_category,
            bin_id: entry.bin_id,
            ledger_type: entry.ledger_type,
            qty: entry.qty,
            unit_cost: entry.unit_cost,
            amount,
            account_id: Some(counter),
            cost_center: None,
            loan_issue_line_id: None,
            note: line.note,
        });
    }

    if document.lines.is_empty() {
        return Err(CoreError::validation(
            "every counted quantity matches the books, nothing to adjust",
        ));
    }

    finish_document(tx, document, SourceType::StockAdjustment, journal_lines).await
}

/// Deleting a posted document cancels it: each stock movement is reversed
/// with a new ledger row, the journal entry is voided and the document is
/// kept as CANCELLED.
pub async fn cancel_document<T: LedgerTx>(
    tx: &mut T,
    document_id: Uuid,
) -> CoreResult<StockDocument> {
    let mut document = tx
        .lock_stock_document(document_id)
        .await?
        .ok_or_else(|| CoreError::not_found("stock document", document_id))?;
    if document.status == DocumentStatus::Cancelled {
        return Err(CoreError::InvalidState(format!(
            "document {} is already cancelled",
            document.number
        )));
    }

    if document.kind == DocumentKind::LoanIssue {
        for line in &document.lines {
            if tx.returned_loan_qty(line.id).await? > Decimal::ZERO {
                return Err(CoreError::HasDependents {
                    entity: "stock document",
                    id: document.id,
                    reason: "loan lines have already been returned".to_string(),
                });
            }
        }
    }

    let movements = tx
        .stock_ledger(&StockLedgerQuery {
            ref_table: Some(document.kind.ref_table().to_string()),
            ref_id: Some(document.id),
            ..Default::default()
        })
        .await?;
    let note = format!("cancel {}", document.number);
    for movement in movements.iter().rev() {
        ledger::reverse(tx, movement, Some(note.clone())).await?;
    }

    if let Some(entry_id) = document.journal_entry_id {
        journal::void(tx, entry_id).await?;
    }

    if let Some(request_id) = document.item_request_id
        && let Some(mut request) = tx.lock_item_request(request_id).await?
        && request.goods_issue_id == Some(document.id)
    {
        request.status = ItemRequestStatus::Approved;
        request.goods_issue_id = None;
        tx.update_item_request(&request).await?;
    }

    document.status = DocumentStatus::Cancelled;
    tx.update_stock_document(&document).await?;

    info!(
        company_id = %document.company_id,
        document_id = %document.id,
        number = %document.number,
        reversed = movements.len(),
        "warehouse document cancelled"
    );
    Ok(document)
}

pub async fn get_document<T: LedgerTx>(tx: &mut T, document_id: Uuid) -> CoreResult<StockDocument> {
    tx.find_stock_document(document_id)
        .await?
        .ok_or_else(|| CoreError::not_found("stock document", document_id))
}

pub async fn create_item_request<T: LedgerTx>(
    tx: &mut T,
    input: NewItemRequest,
) -> CoreResult<ItemRequest> {
    require_lines(input.lines.len())?;
    for line in &input.lines {
        require_positive(line.qty)?;
    }

    let series = NumberSeries::item_request(input.company_id, input.date);
    let existing = tx
        .document_numbers_in_window(input.company_id, &series.window)
        .await?;
    let floor = series.max_suffix(existing.iter().map(String::as_str));
    let sequence = tx.allocate_sequence(&series.scope, floor).await?;

    let request = ItemRequest {
        id: Uuid::new_v4(),
        company_id: input.company_id,
        number: series.format(sequence),
        date: input.date,
        warehouse_id: input.warehouse_id,
        department: input.department,
        status: ItemRequestStatus::Draft,
        requested_by_id: input.requested_by_id,
        decided_by_id: None,
        decision_note: None,
        goods_issue_id: None,
        created_at: Utc::now(),
        lines: input
            .lines
            .into_iter()
            .map(|line| ItemRequestLine {
                id: Uuid::new_v4(),
                item_id: line.item_id,
                item_category: line.item_category,
                qty: line.qty,
                note: line.note,
            })
            .collect(),
    };
    tx.insert_item_request(&request).await?;
    info!(request_id = %request.id, number = %request.number, "item request created");
    Ok(request)
}

pub async fn get_item_request<T: LedgerTx>(
    tx: &mut T,
    request_id: Uuid,
) -> CoreResult<ItemRequest> {
    tx.lock_item_request(request_id)
        .await?
        .ok_or_else(|| CoreError::not_found("item request", request_id))
}

pub async fn submit_item_request<T: LedgerTx>(
    tx: &mut T,
    request_id: Uuid,
    actor: &Actor,
) -> CoreResult<ItemRequest> {
    let mut request = get_item_request(tx, request_id).await?;
    if request.requested_by_id != actor.user_id && actor.ensure_approver("submit").is_err() {
        return Err(CoreError::Forbidden(
            "only the requester may submit an item request".to_string(),
        ));
    }
    transition(&mut request, ItemRequestStatus::Draft, ItemRequestStatus::Pending)?;
    tx.update_item_request(&request).await?;
    info!(request_id = %request.id, "item request submitted");
    Ok(request)
}

pub async fn approve_item_request<T: LedgerTx>(
    tx: &mut T,
    request_id: Uuid,
    actor: &Actor,
    note: Option<String>,
) -> CoreResult<ItemRequest> {
    decide(tx, request_id, actor, note, ItemRequestStatus::Approved).await
}

pub async fn reject_item_request<T: LedgerTx>(
    tx: &mut T,
    request_id: Uuid,
    actor: &Actor,
    note: Option<String>,
) -> CoreResult<ItemRequest> {
    decide(tx, request_id, actor, note, ItemRequestStatus::Rejected).await
}

/// Creates the goods issue for an approved request and marks it FULFILLED.
pub async fn fulfil_item_request<T: LedgerTx>(
    tx: &mut T,
    request_id: Uuid,
    actor: &Actor,
    fulfil: FulfilItemRequest,
) -> CoreResult<(ItemRequest, StockDocument)> {
    ensure_warehouse(actor, "fulfil item requests")?;
    let mut request = get_item_request(tx, request_id).await?;
    if request.status != ItemRequestStatus::Approved {
        return Err(CoreError::InvalidState(format!(
            "item request {} is {}, only APPROVED requests can be fulfilled",
            request.number,
            request.status.as_str()
        )));
    }

    let issue = create_goods_issue(
        tx,
        GoodsIssueInput {
            company_id: request.company_id,
            date: fulfil.date,
            warehouse_id: request.warehouse_id,
            item_request_id: Some(request.id),
            memo: Some(format!("item request {}", request.number)),
            lines: request
                .lines
                .iter()
                .map(|line| IssueLineInput {
                    item_id: line.item_id,
                    item_category: line.item_category,
                    bin_id: fulfil.bin_id.clone(),
                    qty: line.qty,
                    expense_account_id: fulfil.expense_account_id,
                    cost_center: fulfil.cost_center.clone().or_else(|| request.department.clone()),
                    note: line.note.clone(),
                })
                .collect(),
            created_by_id: actor.user_id,
        },
    )
    .await?;

    transition(&mut request, ItemRequestStatus::Approved, ItemRequestStatus::Fulfilled)?;
    request.goods_issue_id = Some(issue.id);
    tx.update_item_request(&request).await?;
    info!(
        request_id = %request.id,
        goods_issue = %issue.number,
        "item request fulfilled"
    );
    Ok((request, issue))
}

/// Warehouse staff and approvers may move stock.
pub fn ensure_warehouse(actor: &Actor, action: &str) -> CoreResult<()> {
    match actor.role {
        Role::Admin | Role::Manager | Role::Warehouse => Ok(()),
        role => Err(CoreError::Forbidden(format!("role {role:?} may not {action}"))),
    }
}

async fn decide<T: LedgerTx>(
    tx: &mut T,
    request_id: Uuid,
    actor: &Actor,
    note: Option<String>,
    outcome: ItemRequestStatus,
) -> CoreResult<ItemRequest> {
    actor.ensure_approver("decide item requests")?;
    let mut request = get_item_request(tx, request_id).await?;
    transition(&mut request, ItemRequestStatus::Pending, outcome)?;
    request.decided_by_id = Some(actor.user_id);
    request.decision_note = note;
    tx.update_item_request(&request).await?;
    info!(
        request_id = %request.id,
        status = request.status.as_str(),
        "item request decided"
    );
    Ok(request)
}

fn transition(
    request: &mut ItemRequest,
    from: ItemRequestStatus,
    to: ItemRequestStatus,
) -> CoreResult<()> {
    if request.status != from {
        return Err(CoreError::InvalidState(format!(
            "item request {} is {}, expected {}",
            request.number,
            request.status.as_str(),
            from.as_str()
        )));
    }
    request.status = to;
    Ok(())
}

fn receipt_credit_key(source: ReceiptSource) -> SystemAccountKey {
    match source {
        ReceiptSource::Supplier => SystemAccountKey::AccountsPayableSupplier,
        ReceiptSource::Production => SystemAccountKey::ProductionClearing,
        ReceiptSource::Other => SystemAccountKey::OtherIncome,
    }
}

async fn document_number<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    kind: DocumentKind,
    date: NaiveDate,
) -> CoreResult<String> {
    let series = NumberSeries::stock_document(company_id, kind, date);
    let existing = tx.document_numbers_in_window(company_id, &series.window).await?;
    let floor = series.max_suffix(existing.iter().map(String::as_str));
    let sequence = tx.allocate_sequence(&series.scope, floor).await?;
    Ok(series.format(sequence))
}

async fn open_document<T: LedgerTx>(
    tx: &mut T,
    kind: DocumentKind,
    company_id: Uuid,
    date: NaiveDate,
    warehouse_id: Uuid,
    memo: Option<String>,
    created_by_id: Uuid,
) -> CoreResult<StockDocument> {
    let number = document_number(tx, company_id, kind, date).await?;
    Ok(StockDocument {
        id: Uuid::new_v4(),
        company_id,
        kind,
        number,
        date,
        warehouse_id,
        receipt_source: None,
        counterparty: None,
        item_request_id: None,
        memo,
        status: DocumentStatus::Posted,
        journal_entry_id: None,
        created_by_id,
        created_at: Utc::now(),
        lines: Vec::new(),
    })
}

/// Posts the journal (skipped when every amount is zero, e.g. free samples)
/// and persists the document.
async fn finish_document<T: LedgerTx>(
    tx: &mut T,
    mut document: StockDocument,
    source_type: SourceType,
    journal_lines: Vec<JournalLineInput>,
) -> CoreResult<StockDocument> {
    let journal_lines: Vec<JournalLineInput> = journal_lines
        .into_iter()
        .filter(|line| !(line.debit.is_zero() && line.credit.is_zero()))
        .collect();

    if !journal_lines.is_empty() {
        let memo = match &document.memo {
            Some(memo) => format!("{} {}", document.number, memo),
            None => document.number.clone(),
        };
        let entry = journal::post(
            tx,
            NewJournalEntry {
                company_id: document.company_id,
                date: document.date,
                source_type,
                source_id: Some(document.id),
                memo: Some(memo),
                lines: journal_lines,
                created_by_id: document.created_by_id,
            },
        )
        .await?;
        document.journal_entry_id = Some(entry.id);
    }

    tx.insert_stock_document(&document).await?;
    info!(
        company_id = %document.company_id,
        document_id = %document.id,
        kind = document.kind.as_str(),
        number = %document.number,
        amount = %document.total_amount(),
        "warehouse document created"
    );
    Ok(document)
}

fn require_lines(count: usize) -> CoreResult<()> {
    if count == 0 {
        return Err(CoreError::validation("a document needs at least one line"));
    }
    Ok(())
}

fn require_positive(qty: Decimal) -> CoreResult<()> {
    if qty <= Decimal::ZERO {
        return Err(CoreError::validation("line quantity must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pks_core::{JournalStatus, LedgerStore, PksChartTemplate};
    use pks_finance::system_accounts::install_template;
    use pks_store::InMemoryLedgerStore;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: InMemoryLedgerStore,
        company: Uuid,
        warehouse: Uuid,
        item: Uuid,
        clerk: Uuid,
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
            item: Uuid::new_v4(),
            clerk: Uuid::new_v4(),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()
    }

    fn receipt(fx: &Fixture, qty: Decimal, unit_cost: Decimal) -> GoodsReceiptInput {
        GoodsReceiptInput {
            company_id: fx.company,
            date: date(),
            warehouse_id: fx.warehouse,
            source: ReceiptSource::Supplier,
            counterparty: Some("CV Sawit Makmur".into()),
            memo: None,
            lines: vec![ReceiptLineInput {
                item_id: fx.item,
                item_category: ItemCategory::General,
                bin_id: None,
                qty,
                unit_cost,
                note: None,
            }],
            created_by_id: fx.clerk,
        }
    }

    fn issue(fx: &Fixture, qty: Decimal) -> GoodsIssueInput {
        GoodsIssueInput {
            company_id: fx.company,
            date: date(),
            warehouse_id: fx.warehouse,
            item_request_id: None,
            memo: None,
            lines: vec![IssueLineInput {
                item_id: fx.item,
                item_category: ItemCategory::General,
                bin_id: None,
                qty,
                expense_account_id: None,
                cost_center: Some("PRESS".into()),
                note: None,
            }],
            created_by_id: fx.clerk,
        }
    }

    async fn account(tx: &mut impl LedgerTx, company: Uuid, key: SystemAccountKey) -> Uuid {
        system_accounts::get(tx, company, key).await.unwrap()
    }

    #[tokio::test]
    async fn receipt_debits_inventory_and_credits_payable() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();

        let document = create_goods_receipt(&mut tx, receipt(&fx, dec!(10), dec!(12500)))
            .await
            .unwrap();
        assert!(document.number.starts_with("GR-202405-"));

        let entry = journal::get_by_id(&mut tx, document.journal_entry_id.unwrap())
            .await
            .unwrap();
        let inventory = account(&mut tx, fx.company, SystemAccountKey::InventoryGeneral).await;
        let payable = account(&mut tx, fx.company, SystemAccountKey::AccountsPayableSupplier).await;
        assert_eq!(entry.total_debit(), dec!(125000));
        assert!(entry.lines.iter().any(|l| l.account_id == inventory && l.debit == dec!(125000)));
        assert!(entry.lines.iter().any(|l| l.account_id == payable && l.credit == dec!(125000)));
        assert_eq!(entry.entry_number, "JGR/2024/05/0001");
    }

    #[tokio::test]
    async fn issue_is_valued_at_pre_issue_average_cost() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();
        create_goods_receipt(&mut tx, receipt(&fx, dec!(10), dec!(100))).await.unwrap();
        create_goods_receipt(&mut tx, receipt(&fx, dec!(30), dec!(140))).await.unwrap();

        let document = create_goods_issue(&mut tx, issue(&fx, dec!(4))).await.unwrap();
        assert_eq!(document.lines[0].unit_cost, dec!(130));
        assert_eq!(document.total_amount(), dec!(520));

        let entry = journal::get_by_id(&mut tx, document.journal_entry_id.unwrap())
            .await
            .unwrap();
        let expense = account(&mut tx, fx.company, SystemAccountKey::GeneralExpense).await;
        let debit = entry.lines.iter().find(|l| l.debit > Decimal::ZERO).unwrap();
        assert_eq!(debit.account_id, expense);
        assert_eq!(debit.cost_center.as_deref(), Some("PRESS"));

        let balance = ledger::get_balance(&mut tx, fx.item, fx.warehouse, None).await.unwrap();
        assert_eq!(balance.qty_on_hand, dec!(36));
        assert_eq!(balance.avg_cost, dec!(130));
    }

    #[tokio::test]
    async fn failing_line_aborts_whole_document() {
        let fx = fixture().await;
        {
            let mut tx = fx.store.begin().await.unwrap();
            create_goods_receipt(&mut tx, receipt(&fx, dec!(5), dec!(100))).await.unwrap();
            tx.commit().await.unwrap();
        }

        let mut input = issue(&fx, dec!(2));
        input.lines.push(IssueLineInput {
            qty: dec!(10),
            ..input.lines[0].clone()
        });
        {
            let mut tx = fx.store.begin().await.unwrap();
            let result = create_goods_issue(&mut tx, input).await;
            assert!(matches!(result, Err(CoreError::InsufficientStock { .. })));
        }

        let mut tx = fx.store.begin().await.unwrap();
        let balance = ledger::get_balance(&mut tx, fx.item, fx.warehouse, None).await.unwrap();
        assert_eq!(balance.qty_on_hand, dec!(5));
        let window = NumberSeries::journal(fx.company, SourceType::GoodsIssue, date()).window;
        assert!(tx.entry_numbers_in_window(fx.company, &window).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmapped_key_aborts_before_any_movement() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let company = Uuid::new_v4();
        let fx = Fixture {
            store: InMemoryLedgerStore::new(),
            company,
            warehouse: Uuid::new_v4(),
            item: Uuid::new_v4(),
            clerk: Uuid::new_v4(),
        };

        let result = create_goods_receipt(&mut tx, receipt(&fx, dec!(1), dec!(1))).await;
        assert!(matches!(result, Err(CoreError::UnmappedSystemKey { .. })));
        let balance = tx.find_stock_balance(fx.item, fx.warehouse, NO_BIN).await.unwrap();
        assert!(balance.is_none());
    }

    #[tokio::test]
    async fn loan_return_restores_original_cost_and_caps_quantity() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();
        create_goods_receipt(&mut tx, receipt(&fx, dec!(10), dec!(200))).await.unwrap();

        let loan = create_loan_issue(
            &mut tx,
            LoanIssueInput {
                company_id: fx.company,
                date: date(),
                warehouse_id: fx.warehouse,
                borrower: "PT Tetangga".into(),
                memo: None,
                lines: vec![LoanLineInput {
                    item_id: fx.item,
                    item_category: ItemCategory::General,
                    bin_id: None,
                    qty: dec!(4),
                    note: None,
                }],
                created_by_id: fx.clerk,
            },
        )
        .await
        .unwrap();
        let loan_line = loan.lines[0].id;

        // A pricier purchase moves the average away from the loan cost.
        create_goods_receipt(&mut tx, receipt(&fx, dec!(6), dec!(300))).await.unwrap();

        let returned = create_loan_return(
            &mut tx,
            LoanReturnInput {
                company_id: fx.company,
                date: date(),
                warehouse_id: fx.warehouse,
                memo: None,
                lines: vec![LoanReturnLineInput {
                    loan_issue_line_id: loan_line,
                    bin_id: None,
                    qty: dec!(3),
                    note: None,
                }],
                created_by_id: fx.clerk,
            },
        )
        .await
        .unwrap();
        assert_eq!(returned.lines[0].unit_cost, dec!(200));
        assert_eq!(returned.total_amount(), dec!(600));

        let balance = ledger::get_balance(&mut tx, fx.item, fx.warehouse, None).await.unwrap();
        assert_eq!(balance.qty_on_hand, dec!(15));
        // (6*200 + 6*300 + 3*200) / 15
        assert_eq!(balance.avg_cost, dec!(240));

        let too_many = create_loan_return(
            &mut tx,
            LoanReturnInput {
                company_id: fx.company,
                date: date(),
                warehouse_id: fx.warehouse,
                memo: None,
                lines: vec![LoanReturnLineInput {
                    loan_issue_line_id: loan_line,
                    bin_id: None,
                    qty: dec!(2),
                    note: None,
                }],
                created_by_id: fx.clerk,
            },
        )
        .await;
        assert!(matches!(too_many, Err(CoreError::Validation(_))));

        assert!(matches!(
            cancel_document(&mut tx, loan.id).await,
            Err(CoreError::HasDependents { .. })
        ));
    }

    #[tokio::test]
    async fn count_books_gain_and_loss() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();
        create_goods_receipt(&mut tx, receipt(&fx, dec!(20), dec!(50))).await.unwrap();

        let document = create_stock_adjustment(
            &mut tx,
            StockCountInput {
                company_id: fx.company,
                date: date(),
                warehouse_id: fx.warehouse,
                memo: Some("stock opname Mei".into()),
                lines: vec![CountLineInput {
                    item_id: fx.item,
                    item_category: ItemCategory::General,
                    bin_id: None,
                    counted_qty: dec!(18),
                    note: None,
                }],
                created_by_id: fx.clerk,
            },
        )
        .await
        .unwrap();
        assert_eq!(document.lines[0].ledger_type, LedgerType::CountDiffOut);
        assert_eq!(document.total_amount(), dec!(100));

        let loss = account(&mut tx, fx.company, SystemAccountKey::InventoryAdjustmentLoss).await;
        let entry = journal::get_by_id(&mut tx, document.journal_entry_id.unwrap())
            .await
            .unwrap();
        assert!(entry.lines.iter().any(|l| l.account_id == loss && l.debit == dec!(100)));

        let unchanged = create_stock_adjustment(
            &mut tx,
            StockCountInput {
                company_id: fx.company,
                date: date(),
                warehouse_id: fx.warehouse,
                memo: None,
                lines: vec![CountLineInput {
                    item_id: fx.item,
                    item_category: ItemCategory::General,
                    bin_id: None,
                    counted_qty: dec!(18),
                    note: None,
                }],
                created_by_id: fx.clerk,
            },
        )
        .await;
        assert!(matches!(unchanged, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn cancelling_receipt_reverses_stock_and_voids_journal() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();
        let document = create_goods_receipt(&mut tx, receipt(&fx, dec!(7), dec!(10)))
            .await
            .unwrap();

        let cancelled = cancel_document(&mut tx, document.id).await.unwrap();
        assert_eq!(cancelled.status, DocumentStatus::Cancelled);

        let balance = ledger::get_balance(&mut tx, fx.item, fx.warehouse, None).await.unwrap();
        assert_eq!(balance.qty_on_hand, Decimal::ZERO);

        let trail = ledger::movements(
            &mut tx,
            &StockLedgerQuery {
                ref_id: Some(document.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let kinds: Vec<_> = trail.iter().map(|entry| entry.ledger_type).collect();
        assert_eq!(kinds, [LedgerType::InReceipt, LedgerType::OutReversal]);

        let entry = journal::get_by_id(&mut tx, document.journal_entry_id.unwrap())
            .await
            .unwrap();
        assert_eq!(entry.status, JournalStatus::Void);
        assert!(matches!(
            cancel_document(&mut tx, document.id).await,
            Err(CoreError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn item_request_flows_to_goods_issue() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();
        create_goods_receipt(&mut tx, receipt(&fx, dec!(10), dec!(75))).await.unwrap();

        let requester = Actor::new(Uuid::new_v4(), Role::Warehouse);
        let manager = Actor::new(Uuid::new_v4(), Role::Manager);
        let request = create_item_request(
            &mut tx,
            NewItemRequest {
                company_id: fx.company,
                date: date(),
                warehouse_id: fx.warehouse,
                department: Some("MAINTENANCE".into()),
                lines: vec![ItemRequestLineInput {
                    item_id: fx.item,
                    item_category: ItemCategory::General,
                    qty: dec!(3),
                    note: None,
                }],
                requested_by_id: requester.user_id,
            },
        )
        .await
        .unwrap();
        assert_eq!(request.number, "IR-202405-0001");

        let fulfil = FulfilItemRequest {
            date: date(),
            bin_id: None,
            expense_account_id: None,
            cost_center: None,
        };
        assert!(matches!(
            fulfil_item_request(&mut tx, request.id, &requester, fulfil.clone()).await,
            Err(CoreError::InvalidState(_))
        ));

        submit_item_request(&mut tx, request.id, &requester).await.unwrap();
        assert!(matches!(
            approve_item_request(&mut tx, request.id, &requester, None).await,
            Err(CoreError::Forbidden(_))
        ));
        approve_item_request(&mut tx, request.id, &manager, Some("ok".into()))
            .await
            .unwrap();

        let (fulfilled, issue) = fulfil_item_request(&mut tx, request.id, &requester, fulfil)
            .await
            .unwrap();
        assert_eq!(fulfilled.status, ItemRequestStatus::Fulfilled);
        assert_eq!(fulfilled.goods_issue_id, Some(issue.id));
        assert_eq!(issue.item_request_id, Some(request.id));
        assert_eq!(issue.total_amount(), dec!(225));

        cancel_document(&mut tx, issue.id).await.unwrap();
        let reopened = get_item_request(&mut tx, request.id).await.unwrap();
        assert_eq!(reopened.status, ItemRequestStatus::Approved);
        assert!(reopened.goods_issue_id.is_none());
    }

    #[tokio::test]
    async fn item_request_number_continues_after_imported_requests() {
        let fx = fixture().await;
        let mut tx = fx.store.begin().await.unwrap();
        let imported = ItemRequest {
            id: Uuid::new_v4(),
            company_id: fx.company,
            number: "IR-202405-0007".into(),
            date: date(),
            warehouse_id: fx.warehouse,
            department: None,
            status: ItemRequestStatus::Draft,
            requested_by_id: fx.clerk,
            decided_by_id: None,
            decision_note: None,
            goods_issue_id: None,
            created_at: Utc::now(),
            lines: Vec::new(),
        };
        tx.insert_item_request(&imported).await.unwrap();

        let request = create_item_request(
            &mut tx,
            NewItemRequest {
                company_id: fx.company,
                date: date(),
                warehouse_id: fx.warehouse,
                department: None,
                lines: vec![ItemRequestLineInput {
                    item_id: fx.item,
                    item_category: ItemCategory::General,
                    qty: dec!(1),
                    note: None,
                }],
                requested_by_id: fx.clerk,
            },
        )
        .await
        .unwrap();
        assert_eq!(request.number, "IR-202405-0008");
    }
}
