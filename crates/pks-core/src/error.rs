use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::system_accounts::SystemAccountKey;

/// Result alias for every core operation.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error kinds surfaced by the posting and valuation core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("journal entry is unbalanced: debit {debit} != credit {credit}")]
    UnbalancedEntry { debit: Decimal, credit: Decimal },

    #[error("company {company_id} has no system account mapped for {}", format_keys(.keys))]
    UnmappedSystemKey {
        company_id: Uuid,
        keys: Vec<SystemAccountKey>,
    },

    #[error(
        "insufficient stock for item {item_id} at warehouse {warehouse_id} bin '{bin_id}': requested {requested}, on hand {on_hand}"
    )]
    InsufficientStock {
        item_id: Uuid,
        warehouse_id: Uuid,
        bin_id: String,
        requested: Decimal,
        on_hand: Decimal,
    },

    #[error("account code {0} already exists")]
    DuplicateCode(String),

    #[error("entry number {0} already exists")]
    DuplicateEntryNumber(String),

    #[error("ticket number {0} already exists")]
    DuplicateTicketNumber(String),

    #[error("{0} is already posted")]
    AlreadyPosted(String),

    #[error("account {0} still has child accounts")]
    HasChildren(Uuid),

    #[error("{entity} {id} has dependents: {reason}")]
    HasDependents {
        entity: &'static str,
        id: Uuid,
        reason: String,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("lock wait timed out, retry the operation")]
    LockTimeout,

    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn unmapped(company_id: Uuid, key: SystemAccountKey) -> Self {
        Self::UnmappedSystemKey {
            company_id,
            keys: vec![key],
        }
    }

    /// Errors a caller may resolve by re-running the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout | Self::DuplicateEntryNumber(_) | Self::DuplicateTicketNumber(_)
        )
    }
}

fn format_keys(keys: &[SystemAccountKey]) -> String {
    keys.iter()
        .map(|key| key.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
