use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::system_accounts::ItemCategory;

/// Bin id used when a movement is not tied to a bin.
pub const NO_BIN: &str = "";

/// Quantity and moving-average cost at one `(item, warehouse, bin)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub bin_id: String,
    pub qty_on_hand: Decimal,
    pub avg_cost: Decimal,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockBalance {
    pub fn empty(item_id: Uuid, warehouse_id: Uuid, bin_id: &str) -> Self {
        Self {
            item_id,
            warehouse_id,
            bin_id: bin_id.to_string(),
            qty_on_hand: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn value(&self) -> Decimal {
        self.qty_on_hand * self.avg_cost
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerType {
    InReceipt,
    InWeighbridge,
    InLoanReturn,
    InReversal,
    OutIssue,
    OutLoan,
    OutReversal,
    CountDiffIn,
    CountDiffOut,
}

impl LedgerType {
    pub const ALL: [LedgerType; 9] = [
        Self::InReceipt,
        Self::InWeighbridge,
        Self::InLoanReturn,
        Self::InReversal,
        Self::OutIssue,
        Self::OutLoan,
        Self::OutReversal,
        Self::CountDiffIn,
        Self::CountDiffOut,
    ];

    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            Self::InReceipt
                | Self::InWeighbridge
                | Self::InLoanReturn
                | Self::InReversal
                | Self::CountDiffIn
        )
    }

    /// `after_qty - before_qty == sign * qty`.
    pub fn sign(&self) -> Decimal {
        if self.is_inbound() {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        }
    }

    /// Movement that undoes this one when a document is cancelled.
    pub fn reversal(&self) -> LedgerType {
        if self.is_inbound() {
            Self::OutReversal
        } else {
            Self::InReversal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InReceipt => "IN_RECEIPT",
            Self::InWeighbridge => "IN_WEIGHBRIDGE",
            Self::InLoanReturn => "IN_LOAN_RETURN",
            Self::InReversal => "IN_REVERSAL",
            Self::OutIssue => "OUT_ISSUE",
            Self::OutLoan => "OUT_LOAN",
            Self::OutReversal => "OUT_REVERSAL",
            Self::CountDiffIn => "COUNT_DIFF_IN",
            Self::CountDiffOut => "COUNT_DIFF_OUT",
        }
    }
}

impl FromStr for LedgerType {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| CoreError::validation(format!("unknown ledger type {value}")))
    }
}

/// Append-only movement record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLedgerEntry {
    pub id: Uuid,
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub bin_id: String,
    pub ledger_type: LedgerType,
    pub qty: Decimal,
    pub before_qty: Decimal,
    pub after_qty: Decimal,
    pub unit_cost: Decimal,
    pub ref_table: String,
    pub ref_id: Uuid,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    GoodsReceipt,
    GoodsIssue,
    LoanIssue,
    LoanReturn,
    StockAdjustment,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 5] = [
        Self::GoodsReceipt,
        Self::GoodsIssue,
        Self::LoanIssue,
        Self::LoanReturn,
        Self::StockAdjustment,
    ];

    pub fn number_prefix(&self) -> &'static str {
        match self {
            Self::GoodsReceipt => "GR",
            Self::GoodsIssue => "GI",
            Self::LoanIssue => "LI",
            Self::LoanReturn => "LR",
            Self::StockAdjustment => "ADJ",
        }
    }

    /// Table name stock ledger rows point back to.
    pub fn ref_table(&self) -> &'static str {
        match self {
            Self::GoodsReceipt => "goods_receipts",
            Self::GoodsIssue => "goods_issues",
            Self::LoanIssue => "loan_issues",
            Self::LoanReturn => "loan_returns",
            Self::StockAdjustment => "stock_adjustments",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GoodsReceipt => "GOODS_RECEIPT",
            Self::GoodsIssue => "GOODS_ISSUE",
            Self::LoanIssue => "LOAN_ISSUE",
            Self::LoanReturn => "LOAN_RETURN",
            Self::StockAdjustment => "STOCK_ADJUSTMENT",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| CoreError::validation(format!("unknown document kind {value}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Posted,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posted => "POSTED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "POSTED" => Ok(Self::Posted),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(CoreError::validation(format!("unknown document status {other}"))),
        }
    }
}

/// Where received goods come from; selects the credit side of the receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptSource {
    Supplier,
    Production,
    Other,
}

impl ReceiptSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supplier => "SUPPLIER",
            Self::Production => "PRODUCTION",
            Self::Other => "OTHER",
        }
    }
}

impl FromStr for ReceiptSource {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SUPPLIER" => Ok(Self::Supplier),
            "PRODUCTION" => Ok(Self::Production),
            "OTHER" => Ok(Self::Other),
            other => Err(CoreError::validation(format!("unknown receipt source {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDocumentLine {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_category: ItemCategory,
    pub bin_id: String,
    pub ledger_type: LedgerType,
    pub qty: Decimal,
    pub unit_cost: Decimal,
    pub amount: Decimal,
    pub account_id: Option<Uuid>,
    pub cost_center: Option<String>,
    pub loan_issue_line_id: Option<Uuid>,
    pub note: Option<String>,
}

/// Persisted shape shared by every warehouse document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDocument {
    pub id: Uuid,
    pub company_id: Uuid,
    pub kind: DocumentKind,
    pub number: String,
    pub date: NaiveDate,
    pub warehouse_id: Uuid,
    pub receipt_source: Option<ReceiptSource>,
    pub counterparty: Option<String>,
    pub item_request_id: Option<Uuid>,
    pub memo: Option<String>,
    pub status: DocumentStatus,
    pub journal_entry_id: Option<Uuid>,
    pub created_by_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<StockDocumentLine>,
}

impl StockDocument {
    pub fn total_amount(&self) -> Decimal {
        self.lines.iter().map(|line| line.amount).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemRequestStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Fulfilled,
}

impl ItemRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Fulfilled => "FULFILLED",
        }
    }
}

impl FromStr for ItemRequestStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(Self::Draft),
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "FULFILLED" => Ok(Self::Fulfilled),
            other => Err(CoreError::validation(format!(
                "unknown item request status {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequestLine {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_category: ItemCategory,
    pub qty: Decimal,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub id: Uuid,
    pub company_id: Uuid,
    pub number: String,
    pub date: NaiveDate,
    pub warehouse_id: Uuid,
    pub department: Option<String>,
    pub status: ItemRequestStatus,
    pub requested_by_id: Uuid,
    pub decided_by_id: Option<Uuid>,
    pub decision_note: Option<String>,
    pub goods_issue_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<ItemRequestLine>,
}
