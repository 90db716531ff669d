//! Chart of accounts, system account map, journal engine and the balance read
//! side.
//!
//! Every operation exists twice: as a free function over an open
//! [`LedgerTx`] so other processors can compose it into their own
//! transaction, and as a [`FinanceService`] method that runs it in a
//! transaction of its own.

pub mod accounts;
pub mod journal;
pub mod reports;
pub mod system_accounts;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use pks_core::{
    Account, AccountFilter, Actor, ChartTemplate, CoreResult, JournalEntry, LedgerStore, LedgerTx,
    OpeningBalance, Page, SourceType, SystemAccountKey, SystemAccountMapping,
};
use rust_decimal::Decimal;
use uuid::Uuid;

pub use accounts::{AccountNode, AccountPatch, NewAccount};
pub use journal::{JournalLineInput, NewJournalEntry};
pub use reports::{
    AccountBalance, AccountLedger, BalanceRow, BalanceSheet, IncomeStatement, LedgerLine,
    StatementLine, StatementSection, TrialBalance, TrialBalanceRow,
};
pub use system_accounts::{SystemAccountAssignment, TemplateInstall};

pub struct FinanceService<S> {
    store: Arc<S>,
}

impl<S> Clone for FinanceService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> FinanceService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn create_account(&self, new: NewAccount) -> CoreResult<Account> {
        let mut tx = self.store.begin().await?;
        let account = accounts::create(&mut tx, new).await?;
        tx.commit().await?;
        Ok(account)
    }

    pub async fn update_account(&self, id: Uuid, patch: AccountPatch) -> CoreResult<Account> {
        let mut tx = self.store.begin().await?;
        let account = accounts::update(&mut tx, id, patch).await?;
        tx.commit().await?;
        Ok(account)
    }

    pub async fn delete_account(&self, id: Uuid) -> CoreResult<()> {
        let mut tx = self.store.begin().await?;
        accounts::delete(&mut tx, id).await?;
        tx.commit().await
    }

    pub async fn account_tree(&self, company_id: Uuid) -> CoreResult<Vec<AccountNode>> {
        let mut tx = self.store.begin().await?;
        accounts::tree(&mut tx, company_id).await
    }

    pub async fn list_accounts(&self, filter: &AccountFilter) -> CoreResult<Page<Account>> {
        let mut tx = self.store.begin().await?;
        accounts::list_paged(&mut tx, filter).await
    }

    pub async fn set_system_accounts(
        &self,
        company_id: Uuid,
        assignments: &[SystemAccountAssignment],
    ) -> CoreResult<Vec<SystemAccountMapping>> {
        let mut tx = self.store.begin().await?;
        let saved = system_accounts::set_many(&mut tx, company_id, assignments).await?;
        tx.commit().await?;
        Ok(saved)
    }

    pub async fn system_account(
        &self,
        company_id: Uuid,
        key: SystemAccountKey,
    ) -> CoreResult<Uuid> {
        let mut tx = self.store.begin().await?;
        system_accounts::get(&mut tx, company_id, key).await
    }

    pub async fn system_accounts(
        &self,
        company_id: Uuid,
    ) -> CoreResult<BTreeMap<SystemAccountKey, Uuid>> {
        let mut tx = self.store.begin().await?;
        system_accounts::get_all(&mut tx, company_id).await
    }

    pub async fn validate_system_accounts(&self, company_id: Uuid) -> CoreResult<()> {
        let mut tx = self.store.begin().await?;
        system_accounts::validate_required(&mut tx, company_id).await
    }

    pub async fn install_template<C: ChartTemplate + ?Sized + Sync>(
        &self,
        company_id: Uuid,
        template: &C,
    ) -> CoreResult<TemplateInstall> {
        let mut tx = self.store.begin().await?;
        let summary = system_accounts::install_template(&mut tx, company_id, template).await?;
        tx.commit().await?;
        Ok(summary)
    }

    /// Posts a manual entry on behalf of an accounting user.
    pub async fn post_manual(
        &self,
        actor: &Actor,
        mut request: NewJournalEntry,
    ) -> CoreResult<JournalEntry> {
        actor.ensure_accounting("post journal entries")?;
        request.source_type = SourceType::Manual;
        request.created_by_id = actor.user_id;

        let mut tx = self.store.begin().await?;
        let entry = journal::post(&mut tx, request).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn create_draft(
        &self,
        actor: &Actor,
        mut request: NewJournalEntry,
    ) -> CoreResult<JournalEntry> {
        actor.ensure_accounting("draft journal entries")?;
        request.created_by_id = actor.user_id;

        let mut tx = self.store.begin().await?;
        let entry = journal::create_draft(&mut tx, request).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn post_draft(&self, actor: &Actor, entry_id: Uuid) -> CoreResult<JournalEntry> {
        actor.ensure_accounting("post journal entries")?;

        let mut tx = self.store.begin().await?;
        let entry = journal::post_draft(&mut tx, entry_id, actor.user_id).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn void_entry(&self, actor: &Actor, entry_id: Uuid) -> CoreResult<JournalEntry> {
        actor.ensure_accounting("void journal entries")?;

        let mut tx = self.store.begin().await?;
        let entry = journal::void(&mut tx, entry_id).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn entries_by_source(
        &self,
        source_type: SourceType,
        source_id: Uuid,
    ) -> CoreResult<Vec<JournalEntry>> {
        let mut tx = self.store.begin().await?;
        journal::list_by_source(&mut tx, source_type, source_id).await
    }

    pub async fn entry(&self, entry_id: Uuid) -> CoreResult<JournalEntry> {
        let mut tx = self.store.begin().await?;
        journal::get_by_id(&mut tx, entry_id).await
    }

    /// Allocates a number outside of any posting. The number is consumed;
    /// series may have gaps but never duplicates.
    pub async fn generate_entry_number(
        &self,
        company_id: Uuid,
        source_type: SourceType,
        date: NaiveDate,
    ) -> CoreResult<String> {
        let mut tx = self.store.begin().await?;
        let number = journal::generate_entry_number(&mut tx, company_id, source_type, date).await?;
        tx.commit().await?;
        Ok(number)
    }

    pub async fn set_opening_balance(
        &self,
        actor: &Actor,
        company_id: Uuid,
        account_id: Uuid,
        period_start: NaiveDate,
        amount: Decimal,
    ) -> CoreResult<OpeningBalance> {
        actor.ensure_accounting("set opening balances")?;

        let mut tx = self.store.begin().await?;
        let opening =
            reports::set_opening_balance(&mut tx, company_id, account_id, period_start, amount)
                .await?;
        tx.commit().await?;
        Ok(opening)
    }

    pub async fn account_ledger(
        &self,
        account_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> CoreResult<AccountLedger> {
        let mut tx = self.store.begin().await?;
        reports::get_account_ledger(&mut tx, account_id, from, to).await
    }

    pub async fn account_balance(
        &self,
        account_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> CoreResult<AccountBalance> {
        let mut tx = self.store.begin().await?;
        reports::account_balance(&mut tx, account_id, from, to).await
    }

    pub async fn all_account_balances(
        &self,
        company_id: Uuid,
        as_of: NaiveDate,
    ) -> CoreResult<Vec<BalanceRow>> {
        let mut tx = self.store.begin().await?;
        reports::get_all_account_balances(&mut tx, company_id, as_of).await
    }

    pub async fn trial_balance(
        &self,
        company_id: Uuid,
        as_of: NaiveDate,
    ) -> CoreResult<TrialBalance> {
        let mut tx = self.store.begin().await?;
        reports::trial_balance(&mut tx, company_id, as_of).await
    }

    pub async fn balance_sheet(
        &self,
        company_id: Uuid,
        as_of: NaiveDate,
    ) -> CoreResult<BalanceSheet> {
        let mut tx = self.store.begin().await?;
        reports::balance_sheet(&mut tx, company_id, as_of).await
    }

    pub async fn income_statement(
        &self,
        company_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> CoreResult<IncomeStatement> {
        let mut tx = self.store.begin().await?;
        reports::income_statement(&mut tx, company_id, from, to).await
    }
}
