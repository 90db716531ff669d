use std::collections::{BTreeMap, HashMap};

use pks_core::{
    Account, AccountStatus, ChartTemplate, CoreError, CoreResult, LedgerTx, SystemAccountKey,
    SystemAccountMapping,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemAccountAssignment {
    pub key: SystemAccountKey,
    pub account_id: Uuid,
}

/// Upserts every assignment; each target must be an active posting account of
/// the same company.
pub async fn set_many<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    assignments: &[SystemAccountAssignment],
) -> CoreResult<Vec<SystemAccountMapping>> {
    let mut saved = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let account = tx
            .find_account(assignment.account_id)
            .await?
            .ok_or_else(|| CoreError::not_found("account", assignment.account_id))?;
        ensure_mappable(&account, company_id, assignment.key)?;

        let mapping = SystemAccountMapping {
            company_id,
            key: assignment.key,
            account_id: account.id,
        };
        tx.upsert_system_account(&mapping).await?;
        saved.push(mapping);
    }

    info!(%company_id, count = saved.len(), "system account map updated");
    Ok(saved)
}

pub async fn get<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    key: SystemAccountKey,
) -> CoreResult<Uuid> {
    match tx.find_system_account(company_id, key).await? {
        Some(account_id) => Ok(account_id),
        None => {
            warn!(%company_id, key = key.as_str(), "system account key is not mapped");
            Err(CoreError::unmapped(company_id, key))
        }
    }
}

pub async fn get_all<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
) -> CoreResult<BTreeMap<SystemAccountKey, Uuid>> {
    Ok(tx
        .list_system_accounts(company_id)
        .await?
        .into_iter()
        .map(|mapping| (mapping.key, mapping.account_id))
        .collect())
}

/// Fails listing every required key the company has not mapped.
pub async fn validate_required<T: LedgerTx>(tx: &mut T, company_id: Uuid) -> CoreResult<()> {
    let mapped = get_all(tx, company_id).await?;
    let missing: Vec<_> = SystemAccountKey::REQUIRED
        .into_iter()
        .filter(|key| !mapped.contains_key(key))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CoreError::UnmappedSystemKey {
            company_id,
            keys: missing,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateInstall {
    pub accounts_created: usize,
    pub accounts_skipped: usize,
    pub mappings_set: usize,
}

/// Creates the template's accounts and default mappings for a company.
///
/// Codes that already exist are kept as they are and reused as parents and
/// mapping targets. Keys that are already mapped are left untouched.
pub async fn install_template<T: LedgerTx, C: ChartTemplate + ?Sized>(
    tx: &mut T,
    company_id: Uuid,
    template: &C,
) -> CoreResult<TemplateInstall> {
    let mut summary = TemplateInstall::default();
    let mut by_code: HashMap<&'static str, Account> = HashMap::new();

    for entry in template.accounts() {
        if let Some(existing) = tx.find_account_by_code(company_id, entry.code).await? {
            summary.accounts_skipped += 1;
            by_code.insert(entry.code, existing);
            continue;
        }

        let parent_id = match entry.parent_code {
            Some(code) => Some(
                by_code
                    .get(code)
                    .map(|parent| parent.id)
                    .ok_or_else(|| {
                        CoreError::validation(format!(
                            "template parent {code} must precede {}",
                            entry.code
                        ))
                    })?,
            ),
            None => None,
        };

        let account = Account {
            id: Uuid::new_v4(),
            company_id,
            code: entry.code.to_string(),
            name: entry.name.to_string(),
            class: entry.class,
            normal_side: entry.class.normal_side(),
            is_posting: entry.is_posting,
            parent_id,
            status: AccountStatus::Aktif,
        };
        tx.insert_account(&account).await?;
        summary.accounts_created += 1;
        by_code.insert(entry.code, account);
    }

    for (key, code) in template.system_accounts() {
        if tx.find_system_account(company_id, key).await?.is_some() {
            continue;
        }
        let account = by_code.get(code).ok_or_else(|| {
            CoreError::validation(format!("template maps {key} to unknown code {code}"))
        })?;
        ensure_mappable(account, company_id, key)?;
        tx.upsert_system_account(&SystemAccountMapping {
            company_id,
            key,
            account_id: account.id,
        })
        .await?;
        summary.mappings_set += 1;
    }

    info!(
        %company_id,
        template = template.name(),
        created = summary.accounts_created,
        skipped = summary.accounts_skipped,
        mappings = summary.mappings_set,
        "chart template installed"
    );
    Ok(summary)
}

fn ensure_mappable(account: &Account, company_id: Uuid, key: SystemAccountKey) -> CoreResult<()> {
    if account.company_id != company_id {
        return Err(CoreError::validation(format!(
            "{key} cannot map to an account of another company"
        )));
    }
    if !account.accepts_postings() {
        return Err(CoreError::validation(format!(
            "{key} must map to an active posting account, {} is not",
            account.code
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pks_core::{AccountClass, LedgerStore, NormalSide, PksChartTemplate};
    use pks_store::InMemoryLedgerStore;

    #[tokio::test]
    async fn get_fails_for_unmapped_key() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let company = Uuid::new_v4();

        let result = get(&mut tx, company, SystemAccountKey::CashBank).await;
        assert!(matches!(
            result,
            Err(CoreError::UnmappedSystemKey { keys, .. }) if keys == [SystemAccountKey::CashBank]
        ));
    }

    #[tokio::test]
    async fn template_install_maps_every_key_and_is_repeatable() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();

        let first = install_template(&mut tx, company, &PksChartTemplate).await.unwrap();
        assert_eq!(first.mappings_set, SystemAccountKey::ALL.len());
        validate_required(&mut tx, company).await.unwrap();

        let second = install_template(&mut tx, company, &PksChartTemplate).await.unwrap();
        assert_eq!(second.accounts_created, 0);
        assert_eq!(second.accounts_skipped, first.accounts_created);
        assert_eq!(second.mappings_set, 0);

        let all = get_all(&mut tx, company).await.unwrap();
        let cash = tx.find_account_by_code(company, "1101").await.unwrap().unwrap();
        assert_eq!(all[&SystemAccountKey::CashBank], cash.id);
    }

    #[tokio::test]
    async fn validate_required_lists_all_missing_keys() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();

        let result = validate_required(&mut tx, company).await;
        assert!(matches!(
            result,
            Err(CoreError::UnmappedSystemKey { keys, .. }) if keys.len() == SystemAccountKey::REQUIRED.len()
        ));
    }

    #[tokio::test]
    async fn header_accounts_cannot_be_mapped() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();

        let header = Account {
            id: Uuid::new_v4(),
            company_id: company,
            code: "13".into(),
            name: "Persediaan".into(),
            class: AccountClass::Asset,
            normal_side: NormalSide::Debit,
            is_posting: false,
            parent_id: None,
            status: AccountStatus::Aktif,
        };
        tx.insert_account(&header).await.unwrap();

        let result = set_many(
            &mut tx,
            company,
            &[SystemAccountAssignment {
                key: SystemAccountKey::InventoryTbs,
                account_id: header.id,
            }],
        )
        .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }
}
