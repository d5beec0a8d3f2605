use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::BoardError;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ShiftDirection {
    Increment,
    Decrement,
}

/// Every live record with `low <= order <= high` moves one step in `direction`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ShiftPlan {
    pub low: u32,
    pub high: u32,
    pub direction: ShiftDirection,
}

impl ShiftPlan {
    /// Order a record currently at `order` holds once the shift is applied.
    #[must_use]
    pub fn shifted(self, order: u32) -> Option<u32> {
        match self.direction {
            ShiftDirection::Increment => order.checked_add(1),
            ShiftDirection::Decrement => order.checked_sub(1).filter(|next| *next >= 1),
        }
    }
}

/// Shift needed to move one record from `from` to `to`.
///
/// Moving later pulls `[from+1, to]` back by one; moving earlier pushes
/// `[to, from-1]` forward by one. `None` when nothing moves.
#[must_use]
pub fn plan_shift(from: u32, to: u32) -> Option<ShiftPlan> {
    match from.cmp(&to) {
        Ordering::Equal => None,
        Ordering::Less => Some(ShiftPlan {
            low: from + 1,
            high: to,
            direction: ShiftDirection::Decrement,
        }),
        Ordering::Greater => Some(ShiftPlan {
            low: to,
            high: from - 1,
            direction: ShiftDirection::Increment,
        }),
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InsertPlan {
    Append(u32),
    Insert { at: u32, shift: ShiftPlan },
}

impl InsertPlan {
    #[must_use]
    pub fn order(self) -> u32 {
        match self {
            Self::Append(order) | Self::Insert { at: order, .. } => order,
        }
    }
}

/// Decide where a new record lands in a dense sequence whose highest order
/// is `max_order`.
///
/// # Errors
/// Returns [`BoardError::InvalidArgument`] when `requested` is not a positive
/// integer or lies beyond `max_order + 1`.
pub fn plan_insert(max_order: u32, requested: Option<i64>) -> Result<InsertPlan, BoardError> {
    let append_at = max_order
        .checked_add(1)
        .ok_or_else(|| BoardError::InvalidArgument("order space exhausted".to_string()))?;

    let Some(requested) = requested else {
        return Ok(InsertPlan::Append(append_at));
    };

    let at = validate_position("order", requested, append_at)?;
    if at == append_at {
        return Ok(InsertPlan::Append(at));
    }

    Ok(InsertPlan::Insert {
        at,
        shift: ShiftPlan {
            low: at,
            high: max_order,
            direction: ShiftDirection::Increment,
        },
    })
}

/// Check that `requested` is a position in `1..=upper`.
///
/// # Errors
/// Returns [`BoardError::InvalidArgument`] naming `field` otherwise.
pub fn validate_position(field: &str, requested: i64, upper: u32) -> Result<u32, BoardError> {
    if requested < 1 {
        return Err(BoardError::InvalidArgument(format!(
            "{field} MUST be a positive integer, got {requested}"
        )));
    }
    match u32::try_from(requested) {
        Ok(position) if position <= upper => Ok(position),
        _ => Err(BoardError::InvalidArgument(format!(
            "{field} {requested} is outside the live range 1..={upper}"
        ))),
    }
}

/// Density check over the live `order` values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct OrderingReport {
    pub live_records: usize,
    pub duplicate_orders: Vec<u32>,
    pub missing_orders: Vec<u32>,
    pub out_of_range_orders: Vec<u32>,
}

impl OrderingReport {
    /// True when the orders are exactly `1..=live_records`.
    #[must_use]
    pub fn is_dense(&self) -> bool {
        self.duplicate_orders.is_empty()
            && self.missing_orders.is_empty()
            && self.out_of_range_orders.is_empty()
    }
}

#[must_use]
pub fn verify_ordering<I>(orders: I) -> OrderingReport
where
    I: IntoIterator<Item = u32>,
{
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    let mut live_records = 0_usize;
    for order in orders {
        *counts.entry(order).or_default() += 1;
        live_records += 1;
    }

    let upper = u32::try_from(live_records).unwrap_or(u32::MAX);
    let duplicate_orders = counts
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(order, _)| *order)
        .collect();
    let out_of_range_orders = counts
        .keys()
        .copied()
        .filter(|order| *order == 0 || *order > upper)
        .collect();
    let missing_orders = (1..=upper)
        .filter(|order| !counts.contains_key(order))
        .collect();

    OrderingReport {
        live_records,
        duplicate_orders,
        missing_orders,
        out_of_range_orders,
    }
}
