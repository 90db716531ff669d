use chrono::NaiveDate;
use pks_core::{AccountClass, AccountStatus, SourceType, SupplierTerms, TicketStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyQuery {
    pub company_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsOfQuery {
    pub company_id: Uuid,
    pub as_of: NaiveDate,
}

/// Inclusive date range; `company_id` is ignored by account-scoped reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRangeQuery {
    pub company_id: Option<Uuid>,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountListQuery {
    pub company_id: Uuid,
    pub search: Option<String>,
    pub class: Option<AccountClass>,
    pub status: Option<AccountStatus>,
    pub is_posting: Option<bool>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryNumberQuery {
    pub company_id: Uuid,
    #[serde(default)]
    pub source_type: SourceType,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryNumberResponse {
    pub entry_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetOpeningBalanceRequest {
    pub company_id: Uuid,
    pub account_id: Uuid,
    pub period_start: NaiveDate,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockBalanceQuery {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub bin_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovementQuery {
    pub item_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    pub ref_table: Option<String>,
    pub ref_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationQuery {
    pub warehouse_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationResponse {
    pub warehouse_id: Option<Uuid>,
    pub value: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketListQuery {
    pub company_id: Uuid,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<TicketStatus>,
    pub supplier_id: Option<Uuid>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketNumberQuery {
    pub company_id: Uuid,
    pub tanggal: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketNumberResponse {
    pub no_seri: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostTicketRequest {
    #[serde(default)]
    pub terms: SupplierTerms,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}
