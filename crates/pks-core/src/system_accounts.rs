use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Semantic roles business events resolve to a posting account through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemAccountKey {
    InventoryTbs,
    InventoryCpo,
    InventoryKernel,
    InventoryGeneral,
    CogsCpo,
    CogsKernel,
    AccountsPayableSupplier,
    CashBank,
    Pph22Payable,
    UnloadWagesPayable,
    ProductionClearing,
    OtherIncome,
    InventoryAdjustmentLoss,
    InventoryAdjustmentGain,
    InventoryLoanReceivable,
    GeneralExpense,
}

impl SystemAccountKey {
    pub const ALL: [SystemAccountKey; 16] = [
        Self::InventoryTbs,
        Self::InventoryCpo,
        Self::InventoryKernel,
        Self::InventoryGeneral,
        Self::CogsCpo,
        Self::CogsKernel,
        Self::AccountsPayableSupplier,
        Self::CashBank,
        Self::Pph22Payable,
        Self::UnloadWagesPayable,
        Self::ProductionClearing,
        Self::OtherIncome,
        Self::InventoryAdjustmentLoss,
        Self::InventoryAdjustmentGain,
        Self::InventoryLoanReceivable,
        Self::GeneralExpense,
    ];

    /// Keys the warehouse and weighbridge processors cannot post without.
    pub const REQUIRED: [SystemAccountKey; 10] = [
        Self::InventoryTbs,
        Self::InventoryGeneral,
        Self::AccountsPayableSupplier,
        Self::CashBank,
        Self::Pph22Payable,
        Self::UnloadWagesPayable,
        Self::InventoryAdjustmentLoss,
        Self::InventoryAdjustmentGain,
        Self::InventoryLoanReceivable,
        Self::GeneralExpense,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InventoryTbs => "INVENTORY_TBS",
            Self::InventoryCpo => "INVENTORY_CPO",
            Self::InventoryKernel => "INVENTORY_KERNEL",
            Self::InventoryGeneral => "INVENTORY_GENERAL",
            Self::CogsCpo => "COGS_CPO",
            Self::CogsKernel => "COGS_KERNEL",
            Self::AccountsPayableSupplier => "ACCOUNTS_PAYABLE_SUPPLIER",
            Self::CashBank => "CASH_BANK",
            Self::Pph22Payable => "PPH22_PAYABLE",
            Self::UnloadWagesPayable => "UNLOAD_WAGES_PAYABLE",
            Self::ProductionClearing => "PRODUCTION_CLEARING",
            Self::OtherIncome => "OTHER_INCOME",
            Self::InventoryAdjustmentLoss => "INVENTORY_ADJUSTMENT_LOSS",
            Self::InventoryAdjustmentGain => "INVENTORY_ADJUSTMENT_GAIN",
            Self::InventoryLoanReceivable => "INVENTORY_LOAN_RECEIVABLE",
            Self::GeneralExpense => "GENERAL_EXPENSE",
        }
    }
}

impl fmt::Display for SystemAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemAccountKey {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == normalized)
            .ok_or_else(|| CoreError::validation(format!("unknown system account key {value}")))
    }
}

/// One persisted `(company, key) -> account` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemAccountMapping {
    pub company_id: Uuid,
    pub key: SystemAccountKey,
    pub account_id: Uuid,
}

/// Inventory category of an item, which selects its stock account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemCategory {
    Tbs,
    Cpo,
    Kernel,
    General,
}

impl ItemCategory {
    pub fn inventory_key(&self) -> SystemAccountKey {
        match self {
            Self::Tbs => SystemAccountKey::InventoryTbs,
            Self::Cpo => SystemAccountKey::InventoryCpo,
            Self::Kernel => SystemAccountKey::InventoryKernel,
            Self::General => SystemAccountKey::InventoryGeneral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tbs => "TBS",
            Self::Cpo => "CPO",
            Self::Kernel => "KERNEL",
            Self::General => "GENERAL",
        }
    }
}

impl FromStr for ItemCategory {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TBS" => Ok(Self::Tbs),
            "CPO" => Ok(Self::Cpo),
            "KERNEL" => Ok(Self::Kernel),
            "GENERAL" => Ok(Self::General),
            other => Err(CoreError::validation(format!("unknown item category {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_parse_from_their_wire_name() {
        for key in SystemAccountKey::ALL {
            assert_eq!(key.as_str().parse::<SystemAccountKey>().unwrap(), key);
        }
        assert!("INVENTORY_SAWIT".parse::<SystemAccountKey>().is_err());
    }

    #[test]
    fn serde_uses_screaming_case() {
        let json = serde_json::to_string(&SystemAccountKey::InventoryAdjustmentLoss).unwrap();
        assert_eq!(json, "\"INVENTORY_ADJUSTMENT_LOSS\"");
    }

    #[test]
    fn category_selects_inventory_key() {
        assert_eq!(ItemCategory::Tbs.inventory_key(), SystemAccountKey::InventoryTbs);
        assert_eq!(ItemCategory::General.inventory_key(), SystemAccountKey::InventoryGeneral);
    }
}
