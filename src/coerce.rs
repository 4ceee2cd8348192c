use serde_json::Value;

use crate::codes::{self, MODE};
use crate::types::{FieldValue, ValueKind};

/// Temperature readings closer than this are considered equal.
pub const TEMPERATURE_TOLERANCE: f64 = 0.05;

// Absorbs the binary representation error of decimal tenths.
const FLOAT_SLACK: f64 = 1e-9;

/// Turn a raw polled value into its stable local type, scaling tenths-class
/// codes to real units. Number coercion yields NaN on garbage, so callers
/// must check `is_finite` before storing.
pub fn coerce(code: &str, raw: &Value) -> FieldValue {
    let Some(spec) = codes::spec(code) else {
        return passthrough(raw);
    };

    match spec.kind {
        ValueKind::Number => {
            let n = to_number(raw);
            if spec.tenths { FieldValue::Number(n / 10.0) } else { FieldValue::Number(n) }
        }
        ValueKind::Boolean => FieldValue::Bool(to_bool(raw)),
        ValueKind::String => {
            let s = to_text(raw);
            if code == MODE {
                FieldValue::Text(codes::normalize_mode(&s))
            } else {
                FieldValue::Text(s)
            }
        }
    }
}

fn passthrough(raw: &Value) -> FieldValue {
    match raw {
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Number(n) => FieldValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        other => FieldValue::Text(to_text(other)),
    }
}

fn to_number(raw: &Value) -> f64 {
    match raw {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => f64::NAN,
    }
}

fn to_bool(raw: &Value) -> bool {
    match raw {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        Value::Number(n) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

fn to_text(raw: &Value) -> String {
    match raw {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Real-unit number to its wire representation for `code`.
pub fn to_wire_number(code: &str, value: f64) -> Value {
    if codes::is_tenths(code) {
        Value::from((value * 10.0).round() as i64)
    } else if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Equality used for every apply/skip/hold decision.
pub fn values_match(code: &str, a: &FieldValue, b: &FieldValue) -> bool {
    match (a, b) {
        (FieldValue::Number(x), FieldValue::Number(y)) if codes::is_temperature(code) => {
            (x - y).abs() <= TEMPERATURE_TOLERANCE + FLOAT_SLACK
        }
        _ => a == b,
    }
}

/// Truthiness of a user-supplied value for boolean codes.
pub fn is_truthy(value: &FieldValue) -> bool {
    match value {
        FieldValue::Bool(b) => *b,
        FieldValue::Number(n) => *n != 0.0 && !n.is_nan(),
        FieldValue::Text(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "on" | "yes"
        ),
    }
}
