//! Value coercion rules shared by the evaluator and its builtin helpers.

use serde_json::{Number, Value};

/// A number during arithmetic: i64 kept exact, everything else as f64.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    /// Back to JSON. Non-finite floats have no JSON representation and
    /// surface as null, matching serde_json's own treatment.
    pub fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::Number(Number::from(i)),
            Num::Float(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        }
    }
}

/// Numeric interpretation of a value: numbers pass through, booleans map to
/// 0/1, null to 0, strings parse (integer first, then float). Containers and
/// unparsable strings have none.
pub(crate) fn to_number(value: &Value) -> Option<Num> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(Num::Int(i)),
            None => n.as_f64().map(Num::Float),
        },
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        Value::Null => Some(Num::Int(0)),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Some(Num::Int(i))
            } else {
                trimmed.parse::<f64>().ok().map(Num::Float)
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Truthiness used by the `bool` helper: the words true/yes/on and
/// false/no/off are recognized case-insensitively; other strings count by
/// non-emptiness, numbers by non-zero, containers by non-emptiness.
pub(crate) fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" => true,
            "false" | "no" | "off" => false,
            other => !other.is_empty(),
        },
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Rendering of a value inside a multi-span template: strings verbatim,
/// null as the empty string, containers as compact JSON.
pub(crate) fn to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// Integer conversion for the `int` helper: floats truncate toward zero.
pub(crate) fn to_int(value: &Value) -> Option<i64> {
    match to_number(value)? {
        Num::Int(i) => Some(i),
        Num::Float(f) if f.is_finite() => Some(f.trunc() as i64),
        Num::Float(_) => None,
    }
}
