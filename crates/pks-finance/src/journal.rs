//! Double-entry journal engine.
//!
//! Every validation runs before the first write, so a rejected entry leaves
//! nothing behind even if the caller keeps using the transaction.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use pks_core::{
    CoreError, CoreResult, JournalEntry, JournalLine, JournalStatus, LedgerTx,
    NumberSeries, SourceType,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLineInput {
    pub account_id: Uuid,
    #[serde(default)]
    pub debit: Decimal,
    #[serde(default)]
    pub credit: Decimal,
    pub cost_center: Option<String>,
    pub dept: Option<String>,
    pub item_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    pub description: Option<String>,
}

impl JournalLineInput {
    pub fn debit(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: amount,
            ..Default::default()
        }
    }

    pub fn credit(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            credit: amount,
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_item(mut self, item_id: Uuid, warehouse_id: Uuid) -> Self {
        self.item_id = Some(item_id);
        self.warehouse_id = Some(warehouse_id);
        self
    }

    pub fn with_cost_center(mut self, cost_center: Option<String>) -> Self {
        self.cost_center = cost_center;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub company_id: Uuid,
    pub date: NaiveDate,
    #[serde(default)]
    pub source_type: SourceType,
    pub source_id: Option<Uuid>,
    pub memo: Option<String>,
    pub lines: Vec<JournalLineInput>,
    /// Stamped from the acting user, never read from a request body.
    #[serde(skip_deserializing)]
    pub created_by_id: Uuid,
}

/// Next `PREFIX/YYYY/MM/NNNN` number for the company's window.
///
/// Must run in the transaction that inserts the entry: the counter row stays
/// locked until it ends, so concurrent posters get distinct numbers.
pub async fn generate_entry_number<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    source_type: SourceType,
    date: NaiveDate,
) -> CoreResult<String> {
    let series = NumberSeries::journal(company_id, source_type, date);
    let existing = tx.entry_numbers_in_window(company_id, &series.window).await?;
    let floor = series.max_suffix(existing.iter().map(String::as_str));
    let sequence = tx.allocate_sequence(&series.scope, floor).await?;
    Ok(series.format(sequence))
}

/// Validates and persists a POSTED entry in one step.
pub async fn post<T: LedgerTx>(tx: &mut T, request: NewJournalEntry) -> CoreResult<JournalEntry> {
    check_lines(&request.lines)?;
    check_balanced(&request.lines)?;
    check_accounts(tx, request.company_id, &request.lines).await?;

    let entry_number =
        generate_entry_number(tx, request.company_id, request.source_type, request.date).await?;
    let now = Utc::now();
    let entry = JournalEntry {
        id: Uuid::new_v4(),
        company_id: request.company_id,
        entry_number,
        date: request.date,
        source_type: request.source_type,
        source_id: request.source_id,
        memo: request.memo,
        status: JournalStatus::Posted,
        posted_at: Some(now),
        posted_by_id: Some(request.created_by_id),
        created_by_id: request.created_by_id,
        created_at: now,
        lines: build_lines(request.lines),
    };
    tx.insert_journal_entry(&entry).await?;

    info!(
        company_id = %entry.company_id,
        entry_id = %entry.id,
        entry_number = %entry.entry_number,
        source_type = entry.source_type.as_str(),
        amount = %entry.total_debit(),
        "journal entry posted"
    );
    Ok(entry)
}

/// Stores a DRAFT; the balance check is deferred to [`post_draft`].
pub async fn create_draft<T: LedgerTx>(
    tx: &mut T,
    request: NewJournalEntry,
) -> CoreResult<JournalEntry> {
    check_lines(&request.lines)?;
    check_accounts(tx, request.company_id, &request.lines).await?;

    let entry_number =
        generate_entry_number(tx, request.company_id, request.source_type, request.date).await?;
    let entry = JournalEntry {
        id: Uuid::new_v4(),
        company_id: request.company_id,
        entry_number,
        date: request.date,
        source_type: request.source_type,
        source_id: request.source_id,
        memo: request.memo,
        status: JournalStatus::Draft,
        posted_at: None,
        posted_by_id: None,
        created_by_id: request.created_by_id,
        created_at: Utc::now(),
        lines: build_lines(request.lines),
    };
    tx.insert_journal_entry(&entry).await?;

    info!(
        entry_id = %entry.id,
        entry_number = %entry.entry_number,
        "journal draft created"
    );
    Ok(entry)
}

pub async fn post_draft<T: LedgerTx>(
    tx: &mut T,
    entry_id: Uuid,
    posted_by_id: Uuid,
) -> CoreResult<JournalEntry> {
    let mut entry = tx
        .lock_journal_entry(entry_id)
        .await?
        .ok_or_else(|| CoreError::not_found("journal entry", entry_id))?;

    match entry.status {
        JournalStatus::Draft => {}
        JournalStatus::Posted => {
            warn!(%entry_id, entry_number = %entry.entry_number, "journal entry already posted");
            return Err(CoreError::AlreadyPosted(format!(
                "journal entry {}",
                entry.entry_number
            )));
        }
        JournalStatus::Void => {
            return Err(CoreError::InvalidState(format!(
                "journal entry {} is void",
                entry.entry_number
            )));
        }
    }

    let inputs: Vec<JournalLineInput> = entry.lines.iter().map(input_of).collect();
    check_lines(&inputs)?;
    check_balanced(&inputs)?;
    check_accounts(tx, entry.company_id, &inputs).await?;

    entry.status = JournalStatus::Posted;
    entry.posted_at = Some(Utc::now());
    entry.posted_by_id = Some(posted_by_id);
    tx.update_journal_entry(&entry).await?;

    info!(
        entry_id = %entry.id,
        entry_number = %entry.entry_number,
        amount = %entry.total_debit(),
        "journal draft posted"
    );
    Ok(entry)
}

/// Marks the entry VOID. Lines are kept for audit; balance queries only read
/// POSTED entries, so the entry drops out of every balance.
pub async fn void<T: LedgerTx>(tx: &mut T, entry_id: Uuid) -> CoreResult<JournalEntry> {
    let mut entry = tx
        .lock_journal_entry(entry_id)
        .await?
        .ok_or_else(|| CoreError::not_found("journal entry", entry_id))?;

    if entry.status == JournalStatus::Void {
        return Err(CoreError::InvalidState(format!(
            "journal entry {} is already void",
            entry.entry_number
        )));
    }

    entry.status = JournalStatus::Void;
    tx.update_journal_entry(&entry).await?;

    info!(
        entry_id = %entry.id,
        entry_number = %entry.entry_number,
        "journal entry voided"
    );
    Ok(entry)
}

pub async fn list_by_source<T: LedgerTx>(
    tx: &mut T,
    source_type: SourceType,
    source_id: Uuid,
) -> CoreResult<Vec<JournalEntry>> {
    tx.journal_entries_by_source(source_type, source_id).await
}

pub async fn get_by_id<T: LedgerTx>(tx: &mut T, entry_id: Uuid) -> CoreResult<JournalEntry> {
    tx.find_journal_entry(entry_id)
        .await?
        .ok_or_else(|| CoreError::not_found("journal entry", entry_id))
}

fn check_lines(lines: &[JournalLineInput]) -> CoreResult<()> {
    if lines.len() < 2 {
        return Err(CoreError::validation(
            "a journal entry needs at least two lines",
        ));
    }
    for (index, line) in lines.iter().enumerate() {
        if line.debit < Decimal::ZERO || line.credit < Decimal::ZERO {
            return Err(CoreError::validation(format!(
                "line {} has a negative amount",
                index + 1
            )));
        }
        let debit_set = !line.debit.is_zero();
        let credit_set = !line.credit.is_zero();
        if debit_set == credit_set {
            return Err(CoreError::validation(format!(
                "line {} must carry exactly one of debit or credit",
                index + 1
            )));
        }
    }
    Ok(())
}

fn check_balanced(lines: &[JournalLineInput]) -> CoreResult<()> {
    let debit: Decimal = lines.iter().map(|line| line.debit).sum();
    let credit: Decimal = lines.iter().map(|line| line.credit).sum();
    if debit != credit {
        warn!(%debit, %credit, "rejected unbalanced journal entry");
        return Err(CoreError::UnbalancedEntry { debit, credit });
    }
    Ok(())
}

async fn check_accounts<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    lines: &[JournalLineInput],
) -> CoreResult<()> {
    let mut seen = HashSet::new();
    for line in lines {
        if !seen.insert(line.account_id) {
            continue;
        }
        let account = tx
            .find_account(line.account_id)
            .await?
            .ok_or_else(|| {
                CoreError::validation(format!("account {} not found", line.account_id))
            })?;
        if account.company_id != company_id {
            return Err(CoreError::validation(format!(
                "account {} belongs to another company",
                account.code
            )));
        }
        if !account.accepts_postings() {
            return Err(CoreError::validation(format!(
                "account {} is not an active posting account",
                account.code
            )));
        }
    }
    Ok(())
}

fn build_lines(inputs: Vec<JournalLineInput>) -> Vec<JournalLine> {
    inputs
        .into_iter()
        .map(|input| JournalLine {
            id: Uuid::new_v4(),
            account_id: input.account_id,
            debit: input.debit,
            credit: input.credit,
            cost_center: input.cost_center,
            dept: input.dept,
            item_id: input.item_id,
            warehouse_id: input.warehouse_id,
            description: input.description,
        })
        .collect()
}

fn input_of(line: &JournalLine) -> JournalLineInput {
    JournalLineInput {
        account_id: line.account_id,
        debit: line.debit,
        credit: line.credit,
        cost_center: line.cost_center.clone(),
        dept: line.dept.clone(),
        item_id: line.item_id,
        warehouse_id: line.warehouse_id,
        description: line.description.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system_accounts::install_template;
    use pks_core::{LedgerStore, PksChartTemplate};
    use pks_store::InMemoryLedgerStore;
    use rust_decimal_macros::dec;

    async fn chart(tx: &mut impl LedgerTx, company: Uuid) -> (Uuid, Uuid) {
        install_template(tx, company, &PksChartTemplate).await.unwrap();
        let cash = tx.find_account_by_code(company, "1101").await.unwrap().unwrap();
        let capital = tx.find_account_by_code(company, "3101").await.unwrap().unwrap();
        (cash.id, capital.id)
    }

    fn request(company: Uuid, lines: Vec<JournalLineInput>) -> NewJournalEntry {
        NewJournalEntry {
            company_id: company,
            date: NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
            source_type: SourceType::Manual,
            source_id: None,
            memo: Some("setoran modal".into()),
            lines,
            created_by_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn posts_balanced_entry_with_sequential_numbers() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let (cash, capital) = chart(&mut tx, company).await;

        let lines = vec![
            JournalLineInput::debit(cash, dec!(1000000)),
            JournalLineInput::credit(capital, dec!(1000000)),
        ];
        let first = post(&mut tx, request(company, lines.clone())).await.unwrap();
        let second = post(&mut tx, request(company, lines)).await.unwrap();

        assert_eq!(first.entry_number, "JU/2024/05/0001");
        assert_eq!(second.entry_number, "JU/2024/05/0002");
        assert_eq!(first.status, JournalStatus::Posted);
        assert!(first.posted_at.is_some());
        assert_eq!(first.total_debit(), first.total_credit());
    }

    #[tokio::test]
    async fn unbalanced_entry_writes_nothing() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let (cash, capital) = chart(&mut tx, company).await;

        let result = post(
            &mut tx,
            request(
                company,
                vec![
                    JournalLineInput::debit(cash, dec!(100.00)),
                    JournalLineInput::credit(capital, dec!(99.99)),
                ],
            ),
        )
        .await;

        assert!(matches!(
            result,
            Err(CoreError::UnbalancedEntry { debit, credit })
                if debit == dec!(100.00) && credit == dec!(99.99)
        ));
        assert_eq!(tx.count_account_lines(cash).await.unwrap(), 0);
        let window = NumberSeries::journal(company, SourceType::Manual, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert!(tx
            .entry_numbers_in_window(company, &window.window)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn two_sided_line_is_rejected() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let (cash, capital) = chart(&mut tx, company).await;

        let mut both = JournalLineInput::debit(cash, dec!(10));
        both.credit = dec!(10);
        let result = post(
            &mut tx,
            request(company, vec![both, JournalLineInput::credit(capital, dec!(0))]),
        )
        .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn header_account_cannot_receive_lines() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let (cash, _) = chart(&mut tx, company).await;
        let header = tx.find_account_by_code(company, "3").await.unwrap().unwrap();

        let result = post(
            &mut tx,
            request(
                company,
                vec![
                    JournalLineInput::debit(cash, dec!(5)),
                    JournalLineInput::credit(header.id, dec!(5)),
                ],
            ),
        )
        .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn draft_is_balance_checked_when_posted() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let (cash, capital) = chart(&mut tx, company).await;

        let draft = create_draft(
            &mut tx,
            request(
                company,
                vec![
                    JournalLineInput::debit(cash, dec!(50)),
                    JournalLineInput::credit(capital, dec!(40)),
                ],
            ),
        )
        .await
        .unwrap();
        assert_eq!(draft.status, JournalStatus::Draft);
        assert!(matches!(
            post_draft(&mut tx, draft.id, Uuid::new_v4()).await,
            Err(CoreError::UnbalancedEntry { .. })
        ));

        let balanced = create_draft(
            &mut tx,
            request(
                company,
                vec![
                    JournalLineInput::debit(cash, dec!(40)),
                    JournalLineInput::credit(capital, dec!(40)),
                ],
            ),
        )
        .await
        .unwrap();
        let posted = post_draft(&mut tx, balanced.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(posted.status, JournalStatus::Posted);
        assert!(matches!(
            post_draft(&mut tx, balanced.id, Uuid::new_v4()).await,
            Err(CoreError::AlreadyPosted(_))
        ));
    }

    #[tokio::test]
    async fn void_keeps_entry_and_rejects_second_void() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let (cash, capital) = chart(&mut tx, company).await;

        let source = Uuid::new_v4();
        let mut req = request(
            company,
            vec![
                JournalLineInput::debit(cash, dec!(75)),
                JournalLineInput::credit(capital, dec!(75)),
            ],
        );
        req.source_id = Some(source);
        let entry = post(&mut tx, req).await.unwrap();

        let voided = void(&mut tx, entry.id).await.unwrap();
        assert_eq!(voided.status, JournalStatus::Void);
        assert_eq!(voided.lines.len(), 2);
        assert!(matches!(
            void(&mut tx, entry.id).await,
            Err(CoreError::InvalidState(_))
        ));

        let by_source = list_by_source(&mut tx, SourceType::Manual, source).await.unwrap();
        assert_eq!(by_source.len(), 1);
        assert_eq!(get_by_id(&mut tx, entry.id).await.unwrap().status, JournalStatus::Void);
    }
}
