//! Read side over POSTED journal lines.
//!
//! Stored balances are always `debit - credit`. Presentation signs are applied
//! only in the statement builders, per the account class's normal side.

use std::collections::HashMap;

use chrono::NaiveDate;
use pks_core::{
    Account, AccountClass, CoreError, CoreResult, LedgerTx, LineQuery, NormalSide,
    OpeningBalance, SourceType,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub async fn set_opening_balance<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    account_id: Uuid,
    period_start: NaiveDate,
    amount: Decimal,
) -> CoreResult<OpeningBalance> {
    let account = company_account(tx, company_id, account_id).await?;
    if !account.is_posting {
        return Err(CoreError::validation(format!(
            "opening balances belong on posting accounts, {} is a header",
            account.code
        )));
    }

    let opening = OpeningBalance {
        company_id,
        account_id,
        period_start,
        amount,
    };
    tx.upsert_opening_balance(&opening).await?;
    info!(%company_id, %account_id, %period_start, %amount, "opening balance set");
    Ok(opening)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub class: AccountClass,
    pub normal_side: NormalSide,
    pub opening: Decimal,
    pub debit: Decimal,
    pub credit: Decimal,
    /// `opening + debit - credit`.
    pub closing: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub entry_id: Uuid,
    pub entry_number: String,
    pub date: NaiveDate,
    pub source_type: SourceType,
    pub memo: Option<String>,
    pub description: Option<String>,
    pub debit: Decimal,
    pub credit: Decimal,
    pub running_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLedger {
    pub balance: AccountBalance,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub lines: Vec<LedgerLine>,
}

/// Balance of one account over `[from, to]`.
pub async fn account_balance<T: LedgerTx>(
    tx: &mut T,
    account_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> CoreResult<AccountBalance> {
    Ok(get_account_ledger(tx, account_id, from, to).await?.balance)
}

pub async fn get_account_ledger<T: LedgerTx>(
    tx: &mut T,
    account_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> CoreResult<AccountLedger> {
    if from > to {
        return Err(CoreError::validation("date range starts after it ends"));
    }
    let account = tx
        .find_account(account_id)
        .await?
        .ok_or_else(|| CoreError::not_found("account", account_id))?;

    let opening = balances_before(tx, account.company_id, Some(account_id), from)
        .await?
        .remove(&account_id)
        .unwrap_or_default();

    let posted = tx
        .posted_lines(&LineQuery {
            company_id: account.company_id,
            account_id: Some(account_id),
            from: Some(from),
            to: Some(to),
            before: None,
        })
        .await?;

    let mut running = opening;
    let mut debit = Decimal::ZERO;
    let mut credit = Decimal::ZERO;
    let lines = posted
        .into_iter()
        .map(|line| {
            running += line.debit - line.credit;
            debit += line.debit;
            credit += line.credit;
            LedgerLine {
                entry_id: line.entry_id,
                entry_number: line.entry_number,
                date: line.date,
                source_type: line.source_type,
                memo: line.memo,
                description: line.description,
                debit: line.debit,
                credit: line.credit,
                running_balance: running,
            }
        })
        .collect();

    Ok(AccountLedger {
        balance: AccountBalance {
            account_id,
            code: account.code,
            name: account.name,
            class: account.class,
            normal_side: account.normal_side,
            opening,
            debit,
            credit,
            closing: running,
        },
        from,
        to,
        lines,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub class: AccountClass,
    pub normal_side: NormalSide,
    /// `debit - credit` through the as-of date.
    pub balance: Decimal,
    /// `balance` in the account's normal direction.
    pub presented: Decimal,
}

/// Balance of every posting account at the end of `as_of`, ordered by code.
pub async fn get_all_account_balances<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    as_of: NaiveDate,
) -> CoreResult<Vec<BalanceRow>> {
    let balances = balances_through(tx, company_id, as_of).await?;
    let mut accounts = tx.list_accounts(company_id).await?;
    accounts.retain(|account| account.is_posting);
    accounts.sort_by(|a, b| a.code.cmp(&b.code));

    Ok(accounts
        .into_iter()
        .map(|account| {
            let balance = balances.get(&account.id).copied().unwrap_or_default();
            BalanceRow {
                account_id: account.id,
                presented: account.normal_side.present(balance),
                code: account.code,
                name: account.name,
                class: account.class,
                normal_side: account.normal_side,
                balance,
            }
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalanceRow {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub debit: Decimal,
    pub credit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub as_of: NaiveDate,
    pub rows: Vec<TrialBalanceRow>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

impl TrialBalance {
    pub fn is_balanced(&self) -> bool {
        self.total_debit == self.total_credit
    }
}

pub async fn trial_balance<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    as_of: NaiveDate,
) -> CoreResult<TrialBalance> {
    let rows: Vec<TrialBalanceRow> = get_all_account_balances(tx, company_id, as_of)
        .await?
        .into_iter()
        .filter(|row| !row.balance.is_zero())
        .map(|row| TrialBalanceRow {
            account_id: row.account_id,
            code: row.code,
            name: row.name,
            debit: row.balance.max(Decimal::ZERO),
            credit: (-row.balance).max(Decimal::ZERO),
        })
        .collect();

    Ok(TrialBalance {
        as_of,
        total_debit: rows.iter().map(|row| row.debit).sum(),
        total_credit: rows.iter().map(|row| row.credit).sum(),
        rows,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementSection {
    pub class: AccountClass,
    pub lines: Vec<StatementLine>,
    pub total: Decimal,
}

impl StatementSection {
    fn collect(class: AccountClass, rows: &[BalanceRow]) -> Self {
        let side = class.normal_side();
        let lines: Vec<StatementLine> = rows
            .iter()
            .filter(|row| row.class == class && !row.balance.is_zero())
            .map(|row| StatementLine {
                account_id: row.account_id,
                code: row.code.clone(),
                name: row.name.clone(),
                amount: side.present(row.balance),
            })
            .collect();
        Self {
            class,
            total: lines.iter().map(|line| line.amount).sum(),
            lines,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub as_of: NaiveDate,
    pub assets: StatementSection,
    pub liabilities: StatementSection,
    pub equity: StatementSection,
    /// Accumulated profit not yet closed to equity.
    pub current_earnings: Decimal,
    pub total_liabilities_and_equity: Decimal,
}

pub async fn balance_sheet<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    as_of: NaiveDate,
) -> CoreResult<BalanceSheet> {
    let rows = get_all_account_balances(tx, company_id, as_of).await?;

    let current_earnings: Decimal = -rows
        .iter()
        .filter(|row| !row.class.is_balance_sheet())
        .map(|row| row.balance)
        .sum::<Decimal>();

    let assets = StatementSection::collect(AccountClass::Asset, &rows);
    let liabilities = StatementSection::collect(AccountClass::Liability, &rows);
    let equity = StatementSection::collect(AccountClass::Equity, &rows);
    let total_liabilities_and_equity = liabilities.total + equity.total + current_earnings;

    Ok(BalanceSheet {
        as_of,
        assets,
        liabilities,
        equity,
        current_earnings,
        total_liabilities_and_equity,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub revenue: StatementSection,
    pub cogs: StatementSection,
    pub gross_profit: Decimal,
    pub expenses: StatementSection,
    pub operating_profit: Decimal,
    pub other_income: StatementSection,
    pub other_expense: StatementSection,
    pub net_income: Decimal,
}

/// Movements of profit-and-loss accounts within `[from, to]`. Opening balance
/// records are not applied; P&L accounts restart every period.
pub async fn income_statement<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> CoreResult<IncomeStatement> {
    if from > to {
        return Err(CoreError::validation("date range starts after it ends"));
    }

    let mut movement: HashMap<Uuid, Decimal> = HashMap::new();
    let lines = tx
        .posted_lines(&LineQuery {
            company_id,
            account_id: None,
            from: Some(from),
            to: Some(to),
            before: None,
        })
        .await?;
    for line in lines {
        *movement.entry(line.account_id).or_default() += line.debit - line.credit;
    }

    let mut rows: Vec<BalanceRow> = tx
        .list_accounts(company_id)
        .await?
        .into_iter()
        .filter(|account| account.is_posting && !account.class.is_balance_sheet())
        .map(|account| {
            let balance = movement.get(&account.id).copied().unwrap_or_default();
            BalanceRow {
                account_id: account.id,
                presented: account.normal_side.present(balance),
                code: account.code,
                name: account.name,
                class: account.class,
                normal_side: account.normal_side,
                balance,
            }
        })
        .collect();
    rows.sort_by(|a, b| a.code.cmp(&b.code));

    let revenue = StatementSection::collect(AccountClass::Revenue, &rows);
    let cogs = StatementSection::collect(AccountClass::Cogs, &rows);
    let expenses = StatementSection::collect(AccountClass::Expense, &rows);
    let other_income = StatementSection::collect(AccountClass::OtherIncome, &rows);
    let other_expense = StatementSection::collect(AccountClass::OtherExpense, &rows);

    let gross_profit = revenue.total - cogs.total;
    let operating_profit = gross_profit - expenses.total;
    let net_income = operating_profit + other_income.total - other_expense.total;

    Ok(IncomeStatement {
        from,
        to,
        revenue,
        cogs,
        gross_profit,
        expenses,
        operating_profit,
        other_income,
        other_expense,
        net_income,
    })
}

/// `debit - credit` per account strictly before `before`: the latest opening
/// record on or before that date plus POSTED lines from its period start.
async fn balances_before<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    account_id: Option<Uuid>,
    before: NaiveDate,
) -> CoreResult<HashMap<Uuid, Decimal>> {
    let openings = tx.opening_balances(company_id, before).await?;
    let lines = tx
        .posted_lines(&LineQuery {
            company_id,
            account_id,
            from: None,
            to: None,
            before: Some(before),
        })
        .await?;
    Ok(fold_balances(
        openings
            .into_iter()
            .filter(|opening| account_id.is_none_or(|id| opening.account_id == id)),
        lines.into_iter().map(|line| (line.account_id, line.date, line.debit - line.credit)),
    ))
}

/// `debit - credit` per account at the end of `as_of`.
async fn balances_through<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    as_of: NaiveDate,
) -> CoreResult<HashMap<Uuid, Decimal>> {
    let openings = tx.opening_balances(company_id, as_of).await?;
    let lines = tx
        .posted_lines(&LineQuery {
            company_id,
            account_id: None,
            from: None,
            to: Some(as_of),
            before: None,
        })
        .await?;
    Ok(fold_balances(
        openings.into_iter(),
        lines.into_iter().map(|line| (line.account_id, line.date, line.debit - line.credit)),
    ))
}

/// Lines dated before an account's opening period are already part of that
/// opening amount and are skipped.
fn fold_balances(
    openings: impl Iterator<Item = OpeningBalance>,
    movements: impl Iterator<Item = (Uuid, NaiveDate, Decimal)>,
) -> HashMap<Uuid, Decimal> {
    let mut starts: HashMap<Uuid, NaiveDate> = HashMap::new();
    let mut balances: HashMap<Uuid, Decimal> = HashMap::new();
    for opening in openings {
        starts.insert(opening.account_id, opening.period_start);
        balances.insert(opening.account_id, opening.amount);
    }
    for (account_id, date, amount) in movements {
        if starts.get(&account_id).is_some_and(|start| date < *start) {
            continue;
        }
        *balances.entry(account_id).or_default() += amount;
    }
    balances
}

async fn company_account<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    account_id: Uuid,
) -> CoreResult<Account> {
    let account = tx
        .find_account(account_id)
        .await?
        .ok_or_else(|| CoreError::not_found("account", account_id))?;
    if account.company_id != company_id {
        return Err(CoreError::validation(format!(
            "account {} belongs to another company",
            account.code
        )));
    }
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{self, JournalLineInput, NewJournalEntry};
    use crate::system_accounts::install_template;
    use pks_core::{LedgerStore, PksChartTemplate};
    use pks_store::InMemoryLedgerStore;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    async fn code(tx: &mut impl LedgerTx, company: Uuid, code: &str) -> Uuid {
        tx.find_account_by_code(company, code).await.unwrap().unwrap().id
    }

    async fn post(
        tx: &mut impl LedgerTx,
        company: Uuid,
        date: NaiveDate,
        debit: Uuid,
        credit: Uuid,
        amount: Decimal,
    ) -> Uuid {
        journal::post(
            tx,
            NewJournalEntry {
                company_id: company,
                date,
                source_type: SourceType::Manual,
                source_id: None,
                memo: None,
                lines: vec![
                    JournalLineInput::debit(debit, amount),
                    JournalLineInput::credit(credit, amount),
                ],
                created_by_id: Uuid::new_v4(),
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn ledger_combines_opening_record_and_prior_lines() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        install_template(&mut tx, company, &PksChartTemplate).await.unwrap();
        let cash = code(&mut tx, company, "1101").await;
        let capital = code(&mut tx, company, "3101").await;

        set_opening_balance(&mut tx, company, cash, day(1), dec!(500)).await.unwrap();
        post(&mut tx, company, day(3), cash, capital, dec!(200)).await;
        post(&mut tx, company, day(10), cash, capital, dec!(50)).await;
        post(&mut tx, company, day(12), capital, cash, dec!(30)).await;

        let ledger = get_account_ledger(&mut tx, cash, day(10), day(31)).await.unwrap();
        assert_eq!(ledger.balance.opening, dec!(700));
        assert_eq!(ledger.lines.len(), 2);
        assert_eq!(ledger.lines[0].running_balance, dec!(750));
        assert_eq!(ledger.lines[1].running_balance, dec!(720));
        assert_eq!(ledger.balance.closing, dec!(720));
    }

    #[tokio::test]
    async fn voided_entries_drop_out_of_balances() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        install_template(&mut tx, company, &PksChartTemplate).await.unwrap();
        let cash = code(&mut tx, company, "1101").await;
        let capital = code(&mut tx, company, "3101").await;

        post(&mut tx, company, day(2), cash, capital, dec!(100)).await;
        let mistaken = post(&mut tx, company, day(3), cash, capital, dec!(999)).await;
        journal::void(&mut tx, mistaken).await.unwrap();

        let balance = account_balance(&mut tx, cash, day(1), day(31)).await.unwrap();
        assert_eq!(balance.closing, dec!(100));
    }

    #[tokio::test]
    async fn statements_balance_and_flip_credit_normal_signs() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        install_template(&mut tx, company, &PksChartTemplate).await.unwrap();
        let cash = code(&mut tx, company, "1101").await;
        let capital = code(&mut tx, company, "3101").await;
        let sales = code(&mut tx, company, "4101").await;
        let expense = code(&mut tx, company, "6101").await;

        post(&mut tx, company, day(1), cash, capital, dec!(1000)).await;
        post(&mut tx, company, day(5), cash, sales, dec!(400)).await;
        post(&mut tx, company, day(6), expense, cash, dec!(150)).await;

        let trial = trial_balance(&mut tx, company, day(31)).await.unwrap();
        assert!(trial.is_balanced());
        assert_eq!(trial.total_debit, dec!(1400));

        let sheet = balance_sheet(&mut tx, company, day(31)).await.unwrap();
        assert_eq!(sheet.assets.total, dec!(1250));
        assert_eq!(sheet.equity.total, dec!(1000));
        assert_eq!(sheet.current_earnings, dec!(250));
        assert_eq!(sheet.total_liabilities_and_equity, sheet.assets.total);

        let income = income_statement(&mut tx, company, day(1), day(31)).await.unwrap();
        assert_eq!(income.revenue.total, dec!(400));
        assert_eq!(income.expenses.total, dec!(150));
        assert_eq!(income.net_income, dec!(250));

        let rows = get_all_account_balances(&mut tx, company, day(31)).await.unwrap();
        let capital_row = rows.iter().find(|row| row.account_id == capital).unwrap();
        assert_eq!(capital_row.balance, dec!(-1000));
        assert_eq!(capital_row.presented, dec!(1000));
    }
}
