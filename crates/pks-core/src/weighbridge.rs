use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::valuation::round_money;

/// Decimal places kept on weights (kg).
pub const WEIGHT_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Draft,
    Approved,
    Posted,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Approved => "APPROVED",
            Self::Posted => "POSTED",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(Self::Draft),
            "APPROVED" => Ok(Self::Approved),
            "POSTED" => Ok(Self::Posted),
            other => Err(CoreError::validation(format!("unknown ticket status {other}"))),
        }
    }
}

/// How the supplier is settled; selects the credit side of the purchase entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupplierTerms {
    #[default]
    Credit,
    Cash,
}

/// Derived weights of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightFigures {
    pub netto1: Decimal,
    pub pot_kg: Decimal,
    pub berat_terima: Decimal,
}

/// Derived money amounts of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingFigures {
    pub total: Decimal,
    pub total_pph: Decimal,
    pub total_upah_bongkar: Decimal,
    pub total_pembayaran_supplier: Decimal,
}

impl PricingFigures {
    pub const ZERO: PricingFigures = PricingFigures {
        total: Decimal::ZERO,
        total_pph: Decimal::ZERO,
        total_upah_bongkar: Decimal::ZERO,
        total_pembayaran_supplier: Decimal::ZERO,
    };
}

fn round_weight(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(WEIGHT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `netto1 = bruto - tara`, `potKg = netto1 * pot%`, `beratTerima = netto1 - potKg`.
pub fn compute_weights(
    timbang1: Decimal,
    timbang2: Decimal,
    pot_percent: Decimal,
) -> CoreResult<WeightFigures> {
    if timbang1 <= Decimal::ZERO {
        return Err(CoreError::validation("timbang1 (bruto) must be positive"));
    }
    if timbang2 <= Decimal::ZERO {
        return Err(CoreError::validation("timbang2 (tara) must be positive"));
    }
    if timbang2 >= timbang1 {
        return Err(CoreError::validation(
            "timbang1 (bruto) must exceed timbang2 (tara)",
        ));
    }
    if pot_percent < Decimal::ZERO || pot_percent >= Decimal::ONE {
        return Err(CoreError::validation("pot_percent must be within [0, 1)"));
    }

    let netto1 = timbang1 - timbang2;
    let pot_kg = round_weight(netto1 * pot_percent);
    Ok(WeightFigures {
        netto1,
        pot_kg,
        berat_terima: netto1 - pot_kg,
    })
}

/// Totals are rounded individually; the supplier payment is derived from the
/// rounded parts so the purchase journal balances exactly.
pub fn compute_pricing(
    berat_terima: Decimal,
    harga_per_kg: Decimal,
    pph_rate: Decimal,
    upah_bongkar_per_kg: Decimal,
) -> CoreResult<PricingFigures> {
    if harga_per_kg < Decimal::ZERO {
        return Err(CoreError::validation("harga_per_kg cannot be negative"));
    }
    if pph_rate < Decimal::ZERO || pph_rate >= Decimal::ONE {
        return Err(CoreError::validation("pph_rate must be within [0, 1)"));
    }
    if upah_bongkar_per_kg < Decimal::ZERO {
        return Err(CoreError::validation("upah_bongkar_per_kg cannot be negative"));
    }

    let total = round_money(berat_terima * harga_per_kg);
    let total_pph = round_money(total * pph_rate);
    let total_upah_bongkar = round_money(berat_terima * upah_bongkar_per_kg);
    Ok(PricingFigures {
        total,
        total_pph,
        total_upah_bongkar,
        total_pembayaran_supplier: total - total_pph - total_upah_bongkar,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeighbridgeTicket {
    pub id: Uuid,
    pub company_id: Uuid,
    pub no_seri: String,
    pub vehicle_id: Uuid,
    pub supplier_id: Uuid,
    pub item_id: Uuid,
    pub tanggal: NaiveDate,
    pub jam_masuk: NaiveTime,
    pub jam_keluar: Option<NaiveTime>,
    pub timbang1: Decimal,
    pub timbang2: Decimal,
    pub netto1: Decimal,
    pub pot_percent: Decimal,
    pub pot_kg: Decimal,
    pub berat_terima: Decimal,
    pub harga_per_kg: Decimal,
    pub pph_rate: Decimal,
    pub upah_bongkar_per_kg: Decimal,
    pub total: Decimal,
    pub total_pph: Decimal,
    pub total_upah_bongkar: Decimal,
    pub total_pembayaran_supplier: Decimal,
    pub status: TicketStatus,
    pub warehouse_id: Option<Uuid>,
    pub approved_by_id: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub purchase_je_id: Option<Uuid>,
    pub unload_je_id: Option<Uuid>,
    pub created_by_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl WeighbridgeTicket {
    pub fn is_priced(&self) -> bool {
        self.harga_per_kg > Decimal::ZERO
    }

    pub fn weights(&self) -> WeightFigures {
        WeightFigures {
            netto1: self.netto1,
            pot_kg: self.pot_kg,
            berat_terima: self.berat_terima,
        }
    }

    pub fn pricing(&self) -> PricingFigures {
        PricingFigures {
            total: self.total,
            total_pph: self.total_pph,
            total_upah_bongkar: self.total_upah_bongkar,
            total_pembayaran_supplier: self.total_pembayaran_supplier,
        }
    }

    /// Re-derive every computed field from the raw inputs.
    pub fn recompute(&mut self) -> CoreResult<()> {
        let weights = compute_weights(self.timbang1, self.timbang2, self.pot_percent)?;
        self.netto1 = weights.netto1;
        self.pot_kg = weights.pot_kg;
        self.berat_terima = weights.berat_terima;

        let pricing = compute_pricing(
            self.berat_terima,
            self.harga_per_kg,
            self.pph_rate,
            self.upah_bongkar_per_kg,
        )?;
        self.total = pricing.total;
        self.total_pph = pricing.total_pph;
        self.total_upah_bongkar = pricing.total_upah_bongkar;
        self.total_pembayaran_supplier = pricing.total_pembayaran_supplier;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn reference_ticket_figures() {
        let weights = compute_weights(dec!(10000), dec!(2000), dec!(0.02)).unwrap();
        assert_eq!(weights.netto1, dec!(8000));
        assert_eq!(weights.pot_kg, dec!(160));
        assert_eq!(weights.berat_terima, dec!(7840));

        let pricing = compute_pricing(weights.berat_terima, dec!(2500), dec!(0.015), dec!(20))
            .unwrap();
        assert_eq!(pricing.total, dec!(19600000));
        assert_eq!(pricing.total_pph, dec!(294000));
        assert_eq!(pricing.total_upah_bongkar, dec!(156800));
        assert_eq!(pricing.total_pembayaran_supplier, dec!(19149200));
    }

    #[test]
    fn recomputation_is_stable() {
        let first = compute_weights(dec!(12345.5), dec!(4321.25), dec!(0.035)).unwrap();
        let second = compute_weights(dec!(12345.5), dec!(4321.25), dec!(0.035)).unwrap();
        assert_eq!(first, second);

        let a = compute_pricing(first.berat_terima, dec!(2731), dec!(0.0025), dec!(17.5)).unwrap();
        let b = compute_pricing(second.berat_terima, dec!(2731), dec!(0.0025), dec!(17.5)).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.total,
            a.total_pph + a.total_upah_bongkar + a.total_pembayaran_supplier
        );
    }

    #[test]
    fn rejects_tara_above_bruto() {
        assert!(matches!(
            compute_weights(dec!(1000), dec!(1200), dec!(0)),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn rejects_empty_or_unweighed_tara() {
        assert!(matches!(
            compute_weights(dec!(10000), dec!(10000), dec!(0)),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            compute_weights(dec!(10000), dec!(0), dec!(0.02)),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_rates() {
        assert!(compute_weights(dec!(1000), dec!(200), dec!(1)).is_err());
        assert!(compute_pricing(dec!(800), dec!(2500), dec!(-0.01), dec!(0)).is_err());
    }
}
