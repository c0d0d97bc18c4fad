//! Range-checked arithmetic helpers.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use serde_json::{Number, Value};
use stepkit_action::{ErrorKind, OperationError};

/// Largest `decimals` accepted by `math_round`.
pub(super) const MAX_DECIMALS: i64 = 15;

/// A number that may also arrive as a string such as `"2.5"`, `"NaN"` or
/// `"inf"`. Non-finite values deserialize fine and are refused later with
/// a range error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Numeric(pub f64);

impl<'de> Deserialize<'de> for Numeric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NumericVisitor;

        impl Visitor<'_> for NumericVisitor {
            type Value = Numeric;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or numeric string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Numeric, E> {
                Ok(Numeric(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Numeric, E> {
                Ok(Numeric(v as f64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Numeric, E> {
                Ok(Numeric(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Numeric, E> {
                v.trim()
                    .parse::<f64>()
                    .map(Numeric)
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(NumericVisitor)
    }
}

fn finite(operation: &str, name: &str, v: f64) -> Result<f64, OperationError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(OperationError::range(operation, format!("{name} must be a finite number, got {v}")))
    }
}

/// JSON form of a result: whole values become integers.
pub(super) fn to_value(operation: &str, v: f64) -> Result<Value, OperationError> {
    let v = finite(operation, "result", v)?;
    if v.fract() == 0.0 && v.abs() < 9.007_199_254_740_992e15 {
        return Ok(Value::from(v as i64));
    }
    Number::from_f64(v)
        .map(Value::Number)
        .ok_or_else(|| OperationError::range(operation, "result is not representable"))
}

pub(super) fn clamp(operation: &str, value: f64, min: f64, max: f64) -> Result<f64, OperationError> {
    let value = finite(operation, "value", value)?;
    let min = finite(operation, "min", min)?;
    let max = finite(operation, "max", max)?;
    if min > max {
        return Err(OperationError::range(
            operation,
            format!("min ({min}) is greater than max ({max})"),
        ));
    }
    Ok(value.clamp(min, max))
}

pub(super) fn round(operation: &str, value: f64, decimals: i64) -> Result<f64, OperationError> {
    let value = finite(operation, "value", value)?;
    if !(0..=MAX_DECIMALS).contains(&decimals) {
        return Err(OperationError::range(
            operation,
            format!("decimals must be between 0 and {MAX_DECIMALS}, got {decimals}"),
        ));
    }
    let factor = 10f64.powi(decimals as i32);
    let scaled = finite(operation, "value", value * factor)?;
    Ok(scaled.round() / factor)
}

/// Smallest (`want_max = false`) or largest value.
pub(super) fn extreme(operation: &str, values: &[f64], want_max: bool) -> Result<f64, OperationError> {
    let Some(first) = values.first() else {
        return Err(OperationError::new(operation, ErrorKind::Empty, "values must not be empty"));
    };
    let mut best = finite(operation, "value", *first)?;
    for v in &values[1..] {
        let v = finite(operation, "value", *v)?;
        if (want_max && v > best) || (!want_max && v < best) {
            best = v;
        }
    }
    Ok(best)
}
