//! The fixed set of functions templates may call.
//!
//! Nothing here touches the environment, the filesystem or processes.
//! Argument order follows the pipeline convention: the piped value is the
//! last argument (`{{ .name | replace "a" "b" }}`).

use std::cmp::Ordering;

use serde_json::Value;

use super::exec::{display, truthy};

/// Every callable name, sorted.
pub const FUNCTIONS: &[&str] = &[
    "and", "default", "eq", "ge", "gt", "index", "join", "le", "len", "lower", "lt", "ne", "not",
    "or", "print", "replace", "split", "trim", "upper",
];

pub(super) fn is_function(name: &str) -> bool {
    FUNCTIONS.binary_search(&name).is_ok()
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), String> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(format!(
            "wrong number of args for {name}: want {expected} got {}",
            args.len()
        ))
    }
}

fn at_least(name: &str, args: &[Value], min: usize) -> Result<(), String> {
    if args.len() >= min {
        Ok(())
    } else {
        Err(format!(
            "wrong number of args for {name}: want at least {min} got {}",
            args.len()
        ))
    }
}

/// Call a whitelisted function.
pub(super) fn call(name: &str, args: Vec<Value>) -> Result<Value, String> {
    match name {
        "upper" => {
            arity(name, &args, 1)?;
            Ok(Value::String(display(&args[0]).to_uppercase()))
        }
        "lower" => {
            arity(name, &args, 1)?;
            Ok(Value::String(display(&args[0]).to_lowercase()))
        }
        "trim" => {
            arity(name, &args, 1)?;
            Ok(Value::String(display(&args[0]).trim().to_owned()))
        }
        "replace" => {
            arity(name, &args, 3)?;
            let (old, new, subject) = (display(&args[0]), display(&args[1]), display(&args[2]));
            Ok(Value::String(subject.replace(&old, &new)))
        }
        "split" => {
            arity(name, &args, 2)?;
            let (sep, subject) = (display(&args[0]), display(&args[1]));
            Ok(Value::Array(
                subject
                    .split(sep.as_str())
                    .map(|s| Value::String(s.to_owned()))
                    .collect(),
            ))
        }
        "join" => {
            arity(name, &args, 2)?;
            let sep = display(&args[0]);
            match &args[1] {
                Value::Array(items) => Ok(Value::String(
                    items.iter().map(display).collect::<Vec<_>>().join(&sep),
                )),
                Value::Null => Ok(Value::String(String::new())),
                other => Err(format!("join: expected a list, got {}", type_name(other))),
            }
        }
        "default" => {
            arity(name, &args, 2)?;
            let mut args = args;
            let given = args.pop().unwrap_or(Value::Null);
            let fallback = args.pop().unwrap_or(Value::Null);
            Ok(if truthy(&given) { given } else { fallback })
        }
        "eq" => {
            at_least(name, &args, 2)?;
            let first = &args[0];
            Ok(Value::Bool(args[1..].iter().any(|other| equal(first, other))))
        }
        "ne" => {
            arity(name, &args, 2)?;
            Ok(Value::Bool(!equal(&args[0], &args[1])))
        }
        "lt" | "le" | "gt" | "ge" => {
            arity(name, &args, 2)?;
            let ord = compare(&args[0], &args[1])?;
            Ok(Value::Bool(match name {
                "lt" => ord == Ordering::Less,
                "le" => ord != Ordering::Greater,
                "gt" => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        "len" => {
            arity(name, &args, 1)?;
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => return Err(format!("len of {}", type_name(other))),
            };
            Ok(Value::from(n))
        }
        "index" => {
            at_least(name, &args, 1)?;
            let mut args = args.into_iter();
            let mut item = args.next().unwrap_or(Value::Null);
            for key in args {
                item = index(item, &key)?;
            }
            Ok(item)
        }
        "and" => {
            at_least(name, &args, 1)?;
            let last = args.len() - 1;
            Ok(args
                .into_iter()
                .enumerate()
                .find(|(i, v)| !truthy(v) || *i == last)
                .map_or(Value::Null, |(_, v)| v))
        }
        "or" => {
            at_least(name, &args, 1)?;
            let last = args.len() - 1;
            Ok(args
                .into_iter()
                .enumerate()
                .find(|(i, v)| truthy(v) || *i == last)
                .map_or(Value::Null, |(_, v)| v))
        }
        "not" => {
            arity(name, &args, 1)?;
            Ok(Value::Bool(!truthy(&args[0])))
        }
        "print" => Ok(Value::String(sprint(&args))),
        other => Err(format!("function {other:?} not defined")),
    }
}

pub(super) const fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering, String> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y)
                .ok_or_else(|| "cannot compare NaN".to_owned())
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(format!(
            "incompatible types for comparison: {} and {}",
            type_name(a),
            type_name(b)
        )),
    }
}

fn index(item: Value, key: &Value) -> Result<Value, String> {
    match item {
        Value::Array(mut items) => {
            let i = key
                .as_i64()
                .ok_or_else(|| format!("cannot index list with {}", type_name(key)))?;
            let len = items.len();
            usize::try_from(i)
                .ok()
                .filter(|i| *i < len)
                .map(|i| items.swap_remove(i))
                .ok_or_else(|| format!("index out of range: {i}"))
        }
        Value::Object(mut map) => {
            let k = key
                .as_str()
                .ok_or_else(|| format!("cannot index map with {}", type_name(key)))?;
            Ok(map.remove(k).unwrap_or(Value::Null))
        }
        Value::Null => Ok(Value::Null),
        other => Err(format!("can't index item of type {}", type_name(&other))),
    }
}

/// Concatenate operands, adding a space between two operands when neither
/// is a string.
fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !arg.is_string() && !args[i - 1].is_string() {
            out.push(' ');
        }
        out.push_str(&display(arg));
    }
    out
}
