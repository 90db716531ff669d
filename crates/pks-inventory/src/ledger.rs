//! Per-location stock balances and their append-only movement trail.
//!
//! Each mutation locks the balance row, applies the movement to an
//! [`InventoryPosition`], writes the row back and appends one ledger entry,
//! all inside the caller's transaction.

use chrono::Utc;
use pks_core::{
    CoreError, CoreResult, LedgerTx, LedgerType, NO_BIN, StockBalance, StockLedgerEntry,
    StockLedgerQuery, new_average_cost, round_cost,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Quantity and moving-average cost of one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryPosition {
    pub quantity_on_hand: Decimal,
    pub average_cost: Decimal,
}

impl InventoryPosition {
    pub fn of(balance: &StockBalance) -> Self {
        Self {
            quantity_on_hand: balance.qty_on_hand,
            average_cost: balance.avg_cost,
        }
    }

    pub fn receive(&mut self, quantity: Decimal, unit_cost: Decimal) {
        self.average_cost = new_average_cost(
            self.quantity_on_hand,
            self.average_cost,
            quantity,
            unit_cost,
        );
        self.quantity_on_hand += quantity;
    }

    /// Removes `quantity` at the current average; the cost itself is untouched.
    /// Returns false, changing nothing, when that would go negative.
    pub fn issue(&mut self, quantity: Decimal) -> bool {
        if quantity > self.quantity_on_hand {
            return false;
        }
        self.quantity_on_hand -= quantity;
        true
    }
}

/// One movement against `(item, warehouse, bin)` and the document behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMove {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub bin_id: String,
    pub qty: Decimal,
    pub ledger_type: LedgerType,
    pub ref_table: String,
    pub ref_id: Uuid,
    pub note: Option<String>,
}

impl StockMove {
    pub fn new(
        item_id: Uuid,
        warehouse_id: Uuid,
        bin_id: Option<&str>,
        qty: Decimal,
        ledger_type: LedgerType,
        ref_table: &str,
        ref_id: Uuid,
    ) -> Self {
        Self {
            item_id,
            warehouse_id,
            bin_id: bin_id.unwrap_or(NO_BIN).trim().to_string(),
            qty,
            ledger_type,
            ref_table: ref_table.to_string(),
            ref_id,
            note: None,
        }
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }
}

/// Current balance, or a zero balance when the location has never moved.
pub async fn get_balance<T: LedgerTx>(
    tx: &mut T,
    item_id: Uuid,
    warehouse_id: Uuid,
    bin_id: Option<&str>,
) -> CoreResult<StockBalance> {
    let bin_id = bin_id.unwrap_or(NO_BIN).trim();
    Ok(tx
        .find_stock_balance(item_id, warehouse_id, bin_id)
        .await?
        .unwrap_or_else(|| StockBalance::empty(item_id, warehouse_id, bin_id)))
}

pub async fn record_inbound<T: LedgerTx>(
    tx: &mut T,
    movement: StockMove,
    unit_cost: Decimal,
) -> CoreResult<StockLedgerEntry> {
    if !movement.ledger_type.is_inbound() {
        return Err(CoreError::validation(format!(
            "{} is not an inbound movement",
            movement.ledger_type.as_str()
        )));
    }
    ensure_positive(movement.qty)?;
    if unit_cost < Decimal::ZERO {
        return Err(CoreError::validation("unit cost cannot be negative"));
    }

    let mut balance = tx
        .lock_stock_balance(movement.item_id, movement.warehouse_id, &movement.bin_id)
        .await?;
    let mut position = InventoryPosition::of(&balance);
    position.receive(movement.qty, unit_cost);

    apply(tx, &mut balance, position, movement, round_cost(unit_cost)).await
}

/// Fails with `InsufficientStock`, writing nothing, when `qty` exceeds the
/// quantity on hand. The ledger entry carries the average cost at issue.
pub async fn record_outbound<T: LedgerTx>(
    tx: &mut T,
    movement: StockMove,
) -> CoreResult<StockLedgerEntry> {
    if movement.ledger_type.is_inbound() {
        return Err(CoreError::validation(format!(
            "{} is not an outbound movement",
            movement.ledger_type.as_str()
        )));
    }
    ensure_positive(movement.qty)?;

    let mut balance = tx
        .lock_stock_balance(movement.item_id, movement.warehouse_id, &movement.bin_id)
        .await?;
    let mut position = InventoryPosition::of(&balance);
    if !position.issue(movement.qty) {
        warn!(
            item_id = %movement.item_id,
            warehouse_id = %movement.warehouse_id,
            bin_id = %movement.bin_id,
            requested = %movement.qty,
            on_hand = %balance.qty_on_hand,
            "outbound movement rejected"
        );
        return Err(CoreError::InsufficientStock {
            item_id: movement.item_id,
            warehouse_id: movement.warehouse_id,
            bin_id: movement.bin_id,
            requested: movement.qty,
            on_hand: balance.qty_on_hand,
        });
    }

    let issue_cost = balance.avg_cost;
    apply(tx, &mut balance, position, movement, issue_cost).await
}

/// Brings the location to `counted_qty`, recording the difference as
/// `COUNT_DIFF_IN`/`COUNT_DIFF_OUT` at the current average cost. Returns
/// `None` when the count matches the books.
#[allow(clippy::too_many_arguments)]
pub async fn record_count_adjustment<T: LedgerTx>(
    tx: &mut T,
    item_id: Uuid,
    warehouse_id: Uuid,
    bin_id: Option<&str>,
    counted_qty: Decimal,
    ref_table: &str,
    ref_id: Uuid,
    note: Option<String>,
) -> CoreResult<Option<StockLedgerEntry>> {
    if counted_qty < Decimal::ZERO {
        return Err(CoreError::validation("counted quantity cannot be negative"));
    }
    let bin_id = bin_id.unwrap_or(NO_BIN).trim();
    let mut balance = tx.lock_stock_balance(item_id, warehouse_id, bin_id).await?;
    let delta = counted_qty - balance.qty_on_hand;
    if delta.is_zero() {
        return Ok(None);
    }

    let ledger_type = if delta > Decimal::ZERO {
        LedgerType::CountDiffIn
    } else {
        LedgerType::CountDiffOut
    };
    let movement = StockMove::new(
        item_id,
        warehouse_id,
        Some(bin_id),
        delta.abs(),
        ledger_type,
        ref_table,
        ref_id,
    )
    .with_note(note);

    let position = InventoryPosition {
        quantity_on_hand: counted_qty,
        average_cost: balance.avg_cost,
    };
    let cost = balance.avg_cost;
    apply(tx, &mut balance, position, movement, cost).await.map(Some)
}

/// Undoes a recorded movement with the opposite reversal type. Inbound
/// movements come back out at the current average; outbound ones go back in
/// at the cost they left with.
pub async fn reverse<T: LedgerTx>(
    tx: &mut T,
    original: &StockLedgerEntry,
    note: Option<String>,
) -> CoreResult<StockLedgerEntry> {
    let movement = StockMove {
        item_id: original.item_id,
        warehouse_id: original.warehouse_id,
        bin_id: original.bin_id.clone(),
        qty: original.qty,
        ledger_type: original.ledger_type.reversal(),
        ref_table: original.ref_table.clone(),
        ref_id: original.ref_id,
        note,
    };
    if original.ledger_type.is_inbound() {
        record_outbound(tx, movement).await
    } else {
        record_inbound(tx, movement, original.unit_cost).await
    }
}

pub async fn movements<T: LedgerTx>(
    tx: &mut T,
    query: &StockLedgerQuery,
) -> CoreResult<Vec<StockLedgerEntry>> {
    tx.stock_ledger(query).await
}

/// Book value of stock on hand, optionally for a single warehouse.
pub async fn valuation<T: LedgerTx>(tx: &mut T, warehouse_id: Option<Uuid>) -> CoreResult<Decimal> {
    tx.stock_valuation(warehouse_id).await
}

async fn apply<T: LedgerTx>(
    tx: &mut T,
    balance: &mut StockBalance,
    position: InventoryPosition,
    movement: StockMove,
    unit_cost: Decimal,
) -> CoreResult<StockLedgerEntry> {
    let before_qty = balance.qty_on_hand;
    balance.qty_on_hand = position.quantity_on_hand;
    balance.avg_cost = position.average_cost;
    balance.version += 1;
    tx.save_stock_balance(balance).await?;

    let entry = StockLedgerEntry {
        id: Uuid::new_v4(),
        item_id: movement.item_id,
        warehouse_id: movement.warehouse_id,
        bin_id: movement.bin_id,
        ledger_type: movement.ledger_type,
        qty: movement.qty,
        before_qty,
        after_qty: balance.qty_on_hand,
        unit_cost,
        ref_table: movement.ref_table,
        ref_id: movement.ref_id,
        note: movement.note,
        created_at: Utc::now(),
    };
    tx.append_stock_ledger(&entry).await?;

    debug!(
        item_id = %entry.item_id,
        warehouse_id = %entry.warehouse_id,
        ledger_type = entry.ledger_type.as_str(),
        qty = %entry.qty,
        after_qty = %entry.after_qty,
        avg_cost = %balance.avg_cost,
        "stock movement recorded"
    );
    Ok(entry)
}

fn ensure_positive(qty: Decimal) -> CoreResult<()> {
    if qty <= Decimal::ZERO {
        return Err(CoreError::validation("movement quantity must be positive"));
    }
    Ok(())
}
