use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept on unit costs.
pub const COST_SCALE: u32 = 4;
/// Decimal places kept on monetary amounts (rupiah with sen).
pub const MONEY_SCALE: u32 = 2;

/// Weighted average unit cost after receiving `in_qty` at `in_cost` on top of
/// `old_qty` valued at `old_cost`.
///
/// When the resulting quantity is zero there is nothing to average and the
/// previous cost is kept.
pub fn new_average_cost(
    old_qty: Decimal,
    old_cost: Decimal,
    in_qty: Decimal,
    in_cost: Decimal,
) -> Decimal {
    let new_qty = old_qty + in_qty;
    if new_qty <= Decimal::ZERO {
        return old_cost;
    }
    if old_qty <= Decimal::ZERO {
        return round_cost(in_cost);
    }

    let current_value = old_qty * old_cost;
    let incoming_value = in_qty * in_cost;
    round_cost((current_value + incoming_value) / new_qty)
}

pub fn round_cost(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Book value of `qty` units at `unit_cost`.
pub fn extend(qty: Decimal, unit_cost: Decimal) -> Decimal {
    round_money(qty * unit_cost)
}
