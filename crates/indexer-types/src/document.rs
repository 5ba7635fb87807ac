//! Schemaless documents and the numeric helpers the aggregation engine
//! relies on.
//!
//! Documents are plain JSON objects. Numeric fields that are missing, null or
//! non-numeric read as `0.0` so that measure deltas never fail on sparse
//! documents.

use serde_json::{Map, Value};

/// A schemaless JSON document.
pub type Document = Map<String, Value>;

/// Read a numeric field, treating missing, null and non-numeric values as zero.
pub fn number_field(doc: Option<&Document>, field: &str) -> f64 {
    doc.and_then(|d| d.get(field))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// Round half away from zero to `precision` decimal places.
pub fn round_to(value: f64, precision: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Encode a number as JSON, keeping integral values as integers.
pub fn number_value(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

/// Interpret a JSON value as a document id.
///
/// Non-empty strings and numbers are accepted; anything else yields `None`.
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Copy `base` and overwrite it with every field of `overlay`.
pub fn merge_over(base: &Document, overlay: &Document) -> Document {
    let mut merged = base.clone();
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
