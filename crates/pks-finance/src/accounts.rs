//! Chart of accounts per company.
//!
//! Header accounts (`is_posting = false`) only structure the tree; posting
//! accounts are leaves that receive journal lines.

use std::collections::{HashMap, HashSet};

use pks_core::{
    Account, AccountClass, AccountFilter, AccountStatus, CoreError, CoreResult, LedgerTx,
    NormalSide, Page,
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub company_id: Uuid,
    pub code: String,
    pub name: String,
    pub class: AccountClass,
    /// Defaults to the class's natural side.
    pub normal_side: Option<NormalSide>,
    pub is_posting: bool,
    pub parent_id: Option<Uuid>,
    pub status: Option<AccountStatus>,
}

/// Partial update; `parent_id: Some(None)` detaches the account to a root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub class: Option<AccountClass>,
    pub normal_side: Option<NormalSide>,
    pub is_posting: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<Uuid>>,
    pub status: Option<AccountStatus>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<Uuid>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Uuid>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountNode {
    pub account: Account,
    pub children: Vec<AccountNode>,
}

pub async fn create<T: LedgerTx>(tx: &mut T, new: NewAccount) -> CoreResult<Account> {
    let code = required_text(&new.code, "code")?;
    let name = required_text(&new.name, "name")?;

    if let Some(parent_id) = new.parent_id {
        ensure_header_parent(tx, new.company_id, parent_id).await?;
    }
    if tx
        .find_account_by_code(new.company_id, &code)
        .await?
        .is_some()
    {
        return Err(CoreError::DuplicateCode(code));
    }

    let account = Account {
        id: Uuid::new_v4(),
        company_id: new.company_id,
        code,
        name,
        class: new.class,
        normal_side: new.normal_side.unwrap_or_else(|| new.class.normal_side()),
        is_posting: new.is_posting,
        parent_id: new.parent_id,
        status: new.status.unwrap_or(AccountStatus::Aktif),
    };
    tx.insert_account(&account).await?;

    info!(
        company_id = %account.company_id,
        account_id = %account.id,
        code = %account.code,
        "account created"
    );
    Ok(account)
}

pub async fn update<T: LedgerTx>(tx: &mut T, id: Uuid, patch: AccountPatch) -> CoreResult<Account> {
    let mut account = tx
        .find_account(id)
        .await?
        .ok_or_else(|| CoreError::not_found("account", id))?;

    if let Some(code) = patch.code.as_deref() {
        let code = required_text(code, "code")?;
        if code != account.code {
            if let Some(existing) = tx.find_account_by_code(account.company_id, &code).await?
                && existing.id != id
            {
                return Err(CoreError::DuplicateCode(code));
            }
            account.code = code;
        }
    }
    if let Some(name) = patch.name.as_deref() {
        account.name = required_text(name, "name")?;
    }
    if let Some(class) = patch.class {
        account.class = class;
        if patch.normal_side.is_none() {
            account.normal_side = class.normal_side();
        }
    }
    if let Some(side) = patch.normal_side {
        account.normal_side = side;
    }
    if let Some(is_posting) = patch.is_posting {
        if is_posting && !account.is_posting && tx.count_child_accounts(id).await? > 0 {
            return Err(CoreError::validation(format!(
                "account {} has children and must stay a header account",
                account.code
            )));
        }
        if !is_posting && account.is_posting && tx.count_account_lines(id).await? > 0 {
            return Err(CoreError::validation(format!(
                "account {} already has postings and must stay a posting account",
                account.code
            )));
        }
        account.is_posting = is_posting;
    }
    if let Some(parent_id) = patch.parent_id {
        if let Some(parent_id) = parent_id {
            ensure_header_parent(tx, account.company_id, parent_id).await?;
            ensure_acyclic(tx, id, parent_id).await?;
        }
        account.parent_id = parent_id;
    }
    if let Some(status) = patch.status {
        account.status = status;
    }

    tx.update_account(&account).await?;
    info!(account_id = %id, code = %account.code, "account updated");
    Ok(account)
}

/// Deletion is refused while anything still refers to the account; children
/// must be re-parented first.
pub async fn delete<T: LedgerTx>(tx: &mut T, id: Uuid) -> CoreResult<()> {
    let account = tx
        .find_account(id)
        .await?
        .ok_or_else(|| CoreError::not_found("account", id))?;

    if tx.count_child_accounts(id).await? > 0 {
        return Err(CoreError::HasChildren(id));
    }
    let lines = tx.count_account_lines(id).await?;
    if lines > 0 {
        return Err(CoreError::HasDependents {
            entity: "account",
            id,
            reason: format!("{lines} journal lines"),
        });
    }
    let mappings = tx.count_system_account_refs(id).await?;
    if mappings > 0 {
        return Err(CoreError::HasDependents {
            entity: "account",
            id,
            reason: format!("{mappings} system account mappings"),
        });
    }

    tx.delete_account(id).await?;
    info!(account_id = %id, code = %account.code, "account deleted");
    Ok(())
}

pub async fn tree<T: LedgerTx>(tx: &mut T, company_id: Uuid) -> CoreResult<Vec<AccountNode>> {
    let accounts = tx.list_accounts(company_id).await?;
    Ok(build_forest(accounts))
}

pub async fn list_paged<T: LedgerTx>(
    tx: &mut T,
    filter: &AccountFilter,
) -> CoreResult<Page<Account>> {
    tx.page_accounts(filter).await
}

/// Assemble the flat list into a forest ordered by code at every level.
///
/// Accounts whose parent is missing become roots. Anything left unreached
/// (a corrupt parent cycle) is also promoted to a root instead of being lost.
pub fn build_forest(mut accounts: Vec<Account>) -> Vec<AccountNode> {
    accounts.sort_by(|a, b| a.code.cmp(&b.code));

    let index: HashMap<Uuid, usize> = accounts
        .iter()
        .enumerate()
        .map(|(position, account)| (account.id, position))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); accounts.len()];
    let mut roots = Vec::new();
    for (position, account) in accounts.iter().enumerate() {
        match account.parent_id.and_then(|parent| index.get(&parent)) {
            Some(&parent) if parent != position => children[parent].push(position),
            _ => roots.push(position),
        }
    }

    let mut visited = HashSet::new();
    let mut forest: Vec<AccountNode> = roots
        .iter()
        .map(|&root| assemble(root, &accounts, &children, &mut visited))
        .collect();

    for position in 0..accounts.len() {
        if !visited.contains(&position) {
            forest.push(assemble(position, &accounts, &children, &mut visited));
        }
    }
    forest.sort_by(|a, b| a.account.code.cmp(&b.account.code));
    forest
}

fn assemble(
    position: usize,
    accounts: &[Account],
    children: &[Vec<usize>],
    visited: &mut HashSet<usize>,
) -> AccountNode {
    visited.insert(position);
    let nested = children[position]
        .iter()
        .filter(|child| !visited.contains(*child))
        .copied()
        .collect::<Vec<_>>()
        .into_iter()
        .map(|child| assemble(child, accounts, children, visited))
        .collect();

    AccountNode {
        account: accounts[position].clone(),
        children: nested,
    }
}

async fn ensure_header_parent<T: LedgerTx>(
    tx: &mut T,
    company_id: Uuid,
    parent_id: Uuid,
) -> CoreResult<()> {
    let parent = tx
        .find_account(parent_id)
        .await?
        .ok_or_else(|| CoreError::validation(format!("parent account {parent_id} not found")))?;
    if parent.company_id != company_id {
        return Err(CoreError::validation(
            "parent account belongs to another company",
        ));
    }
    if parent.is_posting {
        return Err(CoreError::validation(format!(
            "parent account {} is a posting account and cannot have children",
            parent.code
        )));
    }
    Ok(())
}

async fn ensure_acyclic<T: LedgerTx>(tx: &mut T, id: Uuid, new_parent: Uuid) -> CoreResult<()> {
    let mut cursor = Some(new_parent);
    let mut seen = HashSet::new();
    while let Some(current) = cursor {
        if current == id {
            return Err(CoreError::validation(
                "re-parenting would make the account its own ancestor",
            ));
        }
        if !seen.insert(current) {
            break;
        }
        cursor = tx
            .find_account(current)
            .await?
            .and_then(|account| account.parent_id);
    }
    Ok(())
}

fn required_text(value: &str, field: &str) -> CoreResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pks_core::LedgerStore;
    use pks_store::InMemoryLedgerStore;

    fn new_account(company_id: Uuid, code: &str, is_posting: bool, parent: Option<Uuid>) -> NewAccount {
        NewAccount {
            company_id,
            code: code.to_string(),
            name: format!("Akun {code}"),
            class: AccountClass::Asset,
            normal_side: None,
            is_posting,
            parent_id: parent,
            status: None,
        }
    }

    fn bare(code: &str, parent_id: Option<Uuid>) -> Account {
        Account {
            id: Uuid::new_v4(),
            company_id: Uuid::nil(),
            code: code.to_string(),
            name: code.to_string(),
            class: AccountClass::Asset,
            normal_side: NormalSide::Debit,
            is_posting: false,
            parent_id,
            status: AccountStatus::Aktif,
        }
    }

    #[tokio::test]
    async fn delete_with_child_fails_until_child_is_reparented() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();

        let parent = create(&mut tx, new_account(company, "11", false, None)).await.unwrap();
        let child = create(&mut tx, new_account(company, "1101", true, Some(parent.id)))
            .await
            .unwrap();

        assert!(matches!(
            delete(&mut tx, parent.id).await,
            Err(CoreError::HasChildren(id)) if id == parent.id
        ));

        update(
            &mut tx,
            child.id,
            AccountPatch {
                parent_id: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        delete(&mut tx, parent.id).await.unwrap();
        assert!(tx.find_account(parent.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn posting_account_cannot_parent() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();

        let leaf = create(&mut tx, new_account(company, "1101", true, None)).await.unwrap();
        let result = create(&mut tx, new_account(company, "1101.1", true, Some(leaf.id))).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn header_with_children_cannot_become_posting() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();

        let header = create(&mut tx, new_account(company, "13", false, None)).await.unwrap();
        create(&mut tx, new_account(company, "1301", true, Some(header.id)))
            .await
            .unwrap();
        let result = update(
            &mut tx,
            header.id,
            AccountPatch {
                is_posting: Some(true),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn duplicate_code_is_rejected() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();

        create(&mut tx, new_account(company, "1101", true, None)).await.unwrap();
        assert!(matches!(
            create(&mut tx, new_account(company, " 1101 ", true, None)).await,
            Err(CoreError::DuplicateCode(code)) if code == "1101"
        ));
    }

    #[tokio::test]
    async fn reparenting_under_own_descendant_is_rejected() {
        let store = InMemoryLedgerStore::new();
        let company = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();

        let top = create(&mut tx, new_account(company, "1", false, None)).await.unwrap();
        let mid = create(&mut tx, new_account(company, "11", false, Some(top.id)))
            .await
            .unwrap();
        let result = update(
            &mut tx,
            top.id,
            AccountPatch {
                parent_id: Some(Some(mid.id)),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn forest_sorts_children_and_promotes_dangling_parents() {
        let root = bare("1", None);
        let b = bare("12", Some(root.id));
        let a = bare("11", Some(root.id));
        let orphan = bare("9", Some(Uuid::new_v4()));

        let forest = build_forest(vec![b.clone(), orphan.clone(), root.clone(), a.clone()]);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].account.id, root.id);
        let codes: Vec<_> = forest[0]
            .children
            .iter()
            .map(|node| node.account.code.as_str())
            .collect();
        assert_eq!(codes, ["11", "12"]);
        assert_eq!(forest[1].account.id, orphan.id);
    }

    #[test]
    fn forest_survives_parent_cycle() {
        let mut a = bare("A", None);
        let mut b = bare("B", None);
        a.parent_id = Some(b.id);
        b.parent_id = Some(a.id);

        let forest = build_forest(vec![a, b]);
        let total: usize = forest.iter().map(|node| 1 + node.children.len()).sum();
        assert_eq!(total, 2);
    }
}
