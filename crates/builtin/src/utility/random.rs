//! Random selection over JSON values.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::Value;
use stepkit_action::{ErrorKind, OperationError};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct WeightedItem {
    pub value: Value,
    pub weight: f64,
}

fn empty(operation: &str) -> OperationError {
    OperationError::new(operation, ErrorKind::Empty, "items must not be empty")
}

/// Inclusive on both ends.
pub(super) fn int(operation: &str, rng: &mut impl Rng, min: i64, max: i64) -> Result<i64, OperationError> {
    if min > max {
        return Err(OperationError::range(
            operation,
            format!("min ({min}) is greater than max ({max})"),
        ));
    }
    Ok(rng.random_range(min..=max))
}

pub(super) fn choose(operation: &str, rng: &mut impl Rng, items: &[Value]) -> Result<Value, OperationError> {
    if items.is_empty() {
        return Err(empty(operation));
    }
    Ok(items[rng.random_range(0..items.len())].clone())
}

/// `count` distinct positions, by a partial Fisher–Yates pass over a copy.
pub(super) fn sample(
    operation: &str,
    rng: &mut impl Rng,
    items: &[Value],
    count: usize,
) -> Result<Vec<Value>, OperationError> {
    if items.is_empty() {
        return Err(empty(operation));
    }
    if count > items.len() {
        return Err(OperationError::range(
            operation,
            format!("count ({count}) exceeds the number of items ({})", items.len()),
        ));
    }
    let mut copy = items.to_vec();
    let (picked, _) = copy.partial_shuffle(rng, count);
    Ok(picked.to_vec())
}

pub(super) fn shuffle(rng: &mut impl Rng, items: &[Value]) -> Vec<Value> {
    let mut copy = items.to_vec();
    copy.shuffle(rng);
    copy
}

/// Smallest index whose cumulative weight exceeds a uniform draw in
/// `[0, total)`.
pub(super) fn weighted(
    operation: &str,
    rng: &mut impl Rng,
    items: &[WeightedItem],
) -> Result<Value, OperationError> {
    if items.is_empty() {
        return Err(empty(operation));
    }
    if let Some(bad) = items.iter().find(|i| !i.weight.is_finite() || i.weight < 0.0) {
        return Err(OperationError::range(
            operation,
            format!("weights must be finite and non-negative, got {}", bad.weight),
        ));
    }
    let total: f64 = items.iter().map(|i| i.weight).sum();
    if total <= 0.0 || !total.is_finite() {
        return Err(OperationError::range(operation, "total weight must be positive"));
    }

    let draw = rng.random_range(0.0..total);
    let mut cumulative = 0.0;
    for item in items {
        cumulative += item.weight;
        if cumulative > draw {
            return Ok(item.value.clone());
        }
    }
    // Rounding can leave the draw at the very top of the range.
    items
        .iter()
        .rev()
        .find(|i| i.weight > 0.0)
        .map(|i| i.value.clone())
        .ok_or_else(|| OperationError::range(operation, "total weight must be positive"))
}
