//! Schema-guided coercion of decoded values.
//!
//! Scripts return everything as text. Normalization turns that text into
//! the shapes the output schema describes: numeric strings into numbers,
//! boolean-ish values into booleans, bracketed or comma-separated strings
//! into arrays and tuples, nested records recursively.
//!
//! Every function here is total. A value that cannot be coerced is returned
//! unchanged, and normalizing a normalized value is a no-op.

use serde_json::{Map, Number, Value};

use super::{ScalarKind, SchemaDescriptor};

/// Normalize `value` against `descriptor`.
///
/// ```
/// use script_relay::schema::normalize::normalize;
/// use script_relay::schema::{ScalarKind, SchemaDescriptor};
/// use serde_json::json;
///
/// let row = SchemaDescriptor::Object(vec![
///     ("count".to_string(), SchemaDescriptor::Scalar(ScalarKind::Integer)),
///     ("done".to_string(), SchemaDescriptor::Scalar(ScalarKind::Boolean)),
///     ("tags".to_string(), SchemaDescriptor::Array(Box::new(SchemaDescriptor::Scalar(ScalarKind::String)))),
/// ]);
/// let raw = json!({"count": "3", "done": "true", "tags": "home, errands"});
/// assert_eq!(
///     normalize(raw, &row),
///     json!({"count": 3, "done": true, "tags": ["home", "errands"]})
/// );
/// ```
pub fn normalize(value: Value, descriptor: &SchemaDescriptor) -> Value {
    match descriptor {
        SchemaDescriptor::Scalar(kind) => normalize_scalar(value, *kind),
        SchemaDescriptor::Array(element) => match into_list(value) {
            Ok(items) => Value::Array(items.into_iter().map(|v| normalize(v, element)).collect()),
            Err(original) => original,
        },
        SchemaDescriptor::Tuple(positions) => match into_list(value) {
            Ok(items) if items.len() == positions.len() => Value::Array(
                items
                    .into_iter()
                    .zip(positions)
                    .map(|(v, d)| normalize(v, d))
                    .collect(),
            ),
            Ok(items) => Value::Array(items),
            Err(original) => original,
        },
        SchemaDescriptor::Object(fields) => match into_record(value) {
            Ok(record) => Value::Object(normalize_record(record, fields)),
            Err(original) => original,
        },
    }
}

fn normalize_record(mut record: Map<String, Value>, fields: &[(String, SchemaDescriptor)]) -> Map<String, Value> {
    for (name, descriptor) in fields {
        if let Some(slot) = record.get_mut(name) {
            let current = std::mem::take(slot);
            *slot = normalize(current, descriptor);
        }
    }
    record
}

fn normalize_scalar(value: Value, kind: ScalarKind) -> Value {
    match (kind, value) {
        (ScalarKind::Integer, Value::String(s)) => parse_integer(&s).unwrap_or(Value::String(s)),
        (ScalarKind::Number, Value::String(s)) => parse_number(&s).unwrap_or(Value::String(s)),
        (ScalarKind::Boolean, Value::String(s)) => parse_bool(&s)
            .map(Value::Bool)
            .unwrap_or(Value::String(s)),
        (ScalarKind::Boolean, Value::Number(n)) => match n.as_i64() {
            Some(0) => Value::Bool(false),
            Some(1) => Value::Bool(true),
            _ => Value::Number(n),
        },
        (_, other) => other,
    }
}

fn parse_integer(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::from(i));
    }
    let f = text.parse::<f64>().ok()?;
    // Whole floats within the exactly-representable range.
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

fn parse_number(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::from(i));
    }
    let f = text.parse::<f64>().ok()?;
    Number::from_f64(f).map(Value::Number)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Arrays pass through. Strings are read as a JSON array, a bracketed list
/// (`[a, b]` or `{a, b}`) or comma-separated text.
fn into_list(value: Value) -> Result<Vec<Value>, Value> {
    let text = match value {
        Value::Array(items) => return Ok(items),
        Value::String(text) => text,
        other => return Err(other),
    };

    let trimmed = text.trim();
    if trimmed.starts_with('[') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
            return Ok(items);
        }
    }
    let inner = strip_brackets(trimmed);
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(inner
        .split(',')
        .map(|item| Value::String(item.trim().to_string()))
        .collect())
}

fn strip_brackets(text: &str) -> &str {
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let Some(inner) = text.strip_prefix(open).and_then(|t| t.strip_suffix(close)) {
            return inner;
        }
    }
    text
}

/// Objects pass through; strings holding a JSON object are parsed.
fn into_record(value: Value) -> Result<Map<String, Value>, Value> {
    match value {
        Value::Object(record) => Ok(record),
        Value::String(text) => match serde_json::from_str::<Value>(text.trim()) {
            Ok(Value::Object(record)) => Ok(record),
            _ => Err(Value::String(text)),
        },
        other => Err(other),
    }
}
