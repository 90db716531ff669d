use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountClass {
    Asset,
    Liability,
    Equity,
    Revenue,
    Cogs,
    Expense,
    OtherIncome,
    OtherExpense,
}

impl AccountClass {
    pub const ALL: [AccountClass; 8] = [
        Self::Asset,
        Self::Liability,
        Self::Equity,
        Self::Revenue,
        Self::Cogs,
        Self::Expense,
        Self::OtherIncome,
        Self::OtherExpense,
    ];

    pub fn normal_side(&self) -> NormalSide {
        match self {
            Self::Asset | Self::Cogs | Self::Expense | Self::OtherExpense => NormalSide::Debit,
            Self::Liability | Self::Equity | Self::Revenue | Self::OtherIncome => {
                NormalSide::Credit
            }
        }
    }

    /// Balance sheet classes carry balances across periods.
    pub fn is_balance_sheet(&self) -> bool {
        matches!(self, Self::Asset | Self::Liability | Self::Equity)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asset => "ASSET",
            Self::Liability => "LIABILITY",
            Self::Equity => "EQUITY",
            Self::Revenue => "REVENUE",
            Self::Cogs => "COGS",
            Self::Expense => "EXPENSE",
            Self::OtherIncome => "OTHER_INCOME",
            Self::OtherExpense => "OTHER_EXPENSE",
        }
    }
}

impl FromStr for AccountClass {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|class| class.as_str() == normalized)
            .ok_or_else(|| CoreError::validation(format!("unknown account class {value}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NormalSide {
    Debit,
    Credit,
}

impl NormalSide {
    /// Presentation amount of a stored `debit - credit` balance.
    pub fn present(&self, debit_minus_credit: Decimal) -> Decimal {
        match self {
            Self::Debit => debit_minus_credit,
            Self::Credit => -debit_minus_credit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "DEBIT",
            Self::Credit => "CREDIT",
        }
    }
}

impl FromStr for NormalSide {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBIT" => Ok(Self::Debit),
            "CREDIT" => Ok(Self::Credit),
            other => Err(CoreError::validation(format!("unknown normal side {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Aktif,
    Nonaktif,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aktif => "AKTIF",
            Self::Nonaktif => "NONAKTIF",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "AKTIF" => Ok(Self::Aktif),
            "NONAKTIF" => Ok(Self::Nonaktif),
            other => Err(CoreError::validation(format!("unknown account status {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub company_id: Uuid,
    pub code: String,
    pub name: String,
    pub class: AccountClass,
    pub normal_side: NormalSide,
    pub is_posting: bool,
    pub parent_id: Option<Uuid>,
    pub status: AccountStatus,
}

impl Account {
    pub fn accepts_postings(&self) -> bool {
        self.is_posting && self.status == AccountStatus::Aktif
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalStatus {
    Draft,
    Posted,
    Void,
}

impl JournalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Posted => "POSTED",
            Self::Void => "VOID",
        }
    }
}

impl FromStr for JournalStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(Self::Draft),
            "POSTED" => Ok(Self::Posted),
            "VOID" => Ok(Self::Void),
            other => Err(CoreError::validation(format!("unknown journal status {other}"))),
        }
    }
}

/// Business event that produced a journal entry; also selects the number prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    #[default]
    Manual,
    GoodsReceipt,
    GoodsIssue,
    LoanIssue,
    LoanReturn,
    StockAdjustment,
    WeighbridgePurchase,
    WeighbridgeUnload,
}

impl SourceType {
    pub const ALL: [SourceType; 8] = [
        Self::Manual,
        Self::GoodsReceipt,
        Self::GoodsIssue,
        Self::LoanIssue,
        Self::LoanReturn,
        Self::StockAdjustment,
        Self::WeighbridgePurchase,
        Self::WeighbridgeUnload,
    ];

    pub fn entry_prefix(&self) -> &'static str {
        match self {
            Self::Manual => "JU",
            Self::GoodsReceipt => "JGR",
            Self::GoodsIssue => "JGI",
            Self::LoanIssue => "JLI",
            Self::LoanReturn => "JLR",
            Self::StockAdjustment => "JADJ",
            Self::WeighbridgePurchase => "JTBS",
            Self::WeighbridgeUnload => "JUB",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "MANUAL",
            Self::GoodsReceipt => "GOODS_RECEIPT",
            Self::GoodsIssue => "GOODS_ISSUE",
            Self::LoanIssue => "LOAN_ISSUE",
            Self::LoanReturn => "LOAN_RETURN",
            Self::StockAdjustment => "STOCK_ADJUSTMENT",
            Self::WeighbridgePurchase => "WEIGHBRIDGE_PURCHASE",
            Self::WeighbridgeUnload => "WEIGHBRIDGE_UNLOAD",
        }
    }
}

impl FromStr for SourceType {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == normalized)
            .ok_or_else(|| CoreError::validation(format!("unknown source type {value}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub id: Uuid,
    pub account_id: Uuid,
    pub debit: Decimal,
    pub credit: Decimal,
    pub cost_center: Option<String>,
    pub dept: Option<String>,
    pub item_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub company_id: Uuid,
    pub entry_number: String,
    pub date: NaiveDate,
    pub source_type: SourceType,
    pub source_id: Option<Uuid>,
    pub memo: Option<String>,
    pub status: JournalStatus,
    pub posted_at: Option<DateTime<Utc>>,
    pub posted_by_id: Option<Uuid>,
    pub created_by_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<JournalLine>,
}

impl JournalEntry {
    pub fn total_debit(&self) -> Decimal {
        self.lines.iter().map(|line| line.debit).sum()
    }

    pub fn total_credit(&self) -> Decimal {
        self.lines.iter().map(|line| line.credit).sum()
    }
}

/// Per-account opening balance for a period, stored as `debit - credit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningBalance {
    pub company_id: Uuid,
    pub account_id: Uuid,
    pub period_start: NaiveDate,
    pub amount: Decimal,
}

/// A line of a POSTED entry, flattened with its header for balance queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedLine {
    pub entry_id: Uuid,
    pub entry_number: String,
    pub date: NaiveDate,
    pub source_type: SourceType,
    pub memo: Option<String>,
    pub account_id: Uuid,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Manager,
    Accounting,
    Warehouse,
    WeighbridgeOperator,
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Self::Admin),
            "MANAGER" => Ok(Self::Manager),
            "ACCOUNTING" => Ok(Self::Accounting),
            "WAREHOUSE" => Ok(Self::Warehouse),
            "WEIGHBRIDGE_OPERATOR" => Ok(Self::WeighbridgeOperator),
            other => Err(CoreError::validation(format!("unknown role {other}"))),
        }
    }
}

/// The user an operation is performed on behalf of; resolved by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn ensure_approver(&self, action: &str) -> CoreResult<()> {
        match self.role {
            Role::Admin | Role::Manager => Ok(()),
            _ => Err(CoreError::Forbidden(format!(
                "role {:?} may not {action}",
                self.role
            ))),
        }
    }

    pub fn ensure_accounting(&self, action: &str) -> CoreResult<()> {
        match self.role {
            Role::Admin | Role::Manager | Role::Accounting => Ok(()),
            _ => Err(CoreError::Forbidden(format!(
                "role {:?} may not {action}",
                self.role
            ))),
        }
    }
}
