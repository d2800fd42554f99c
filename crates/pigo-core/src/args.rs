//! Shared argument extraction for tool implementations.
//!
//! The registry validates payloads against each tool's declared schema; these
//! helpers do the typed extraction inside `execute` so every tool applies the
//! same required/type/integrality rules.

use serde_json::Value;

use crate::error::Error;

/// Interpret a JSON number as an integer. Floats are accepted only when they
/// carry no fractional part (decoders hand `3` back as `3.0` often enough).
pub fn as_integer(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    if let Some(f) = value.as_f64() {
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
            return Some(f as i64);
        }
    }
    None
}

pub fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, Error> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_argument(format!("missing required field '{}'", field)))
}

pub fn optional_str<'a>(args: &'a Value, field: &str) -> Option<&'a str> {
    args.get(field).and_then(Value::as_str)
}

pub fn optional_bool(args: &Value, field: &str) -> Result<bool, Error> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(Error::invalid_argument(format!(
            "field '{}' must be a boolean",
            field
        ))),
    }
}

/// Optional non-negative integer; fractional numbers and negatives rejected.
pub fn optional_usize(args: &Value, field: &str) -> Result<Option<usize>, Error> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match as_integer(v) {
            Some(i) if i >= 0 => Ok(Some(i as usize)),
            Some(_) => Err(Error::invalid_argument(format!(
                "field '{}' must be non-negative",
                field
            ))),
            None => Err(Error::invalid_argument(format!(
                "field '{}' must be an integer",
                field
            ))),
        },
    }
}

/// Optional strictly positive integer (timeouts, limits, top_k).
pub fn optional_positive(args: &Value, field: &str) -> Result<Option<u64>, Error> {
    match optional_usize(args, field)? {
        Some(0) => Err(Error::invalid_argument(format!(
            "field '{}' must be positive",
            field
        ))),
        Some(n) => Ok(Some(n as u64)),
        None => Ok(None),
    }
}
