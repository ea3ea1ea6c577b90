//! Conversion of JSON values into AppleScript literals.
//!
//! Safety comes from how literals are built: backslashes are doubled and a
//! double quote is never written inside a literal. The string is split at
//! each quote and the pieces are concatenated with AppleScript's `quote`
//! constant, so no input can close a literal early.

use std::collections::{HashMap, HashSet};

use serde_json::{Number, Value};

use super::{MarshalledParam, ParamHint};
use crate::config::LimitsConfig;
use crate::error::{Error, Result};

/// Marshal every field of `input`, sorted by field name.
///
/// `input` must be an object (or `null` for "no parameters").
pub fn marshal_params(
    input: &Value,
    hints: &HashMap<String, ParamHint>,
    limits: &LimitsConfig,
) -> Result<Vec<MarshalledParam>> {
    let fields = match input {
        Value::Null => return Ok(Vec::new()),
        Value::Object(map) => map,
        other => {
            return Err(Error::Parameter {
                param: "<input>".to_string(),
                reason: format!("expected an object, got {}", type_name(other)),
            })
        },
    };

    let mut names: Vec<&String> = fields.keys().collect();
    names.sort();

    let mut taken = HashSet::new();
    let mut params = Vec::with_capacity(names.len());
    for name in names {
        let hint = hints.get(name).copied().unwrap_or_default();
        let literal = marshal_value(name, &fields[name.as_str()], hint, limits)?;
        let var_name = unique_variable_name(name, &mut taken);
        params.push(MarshalledParam {
            var_name,
            literal,
            source: name.clone(),
        });
    }
    Ok(params)
}

/// Marshal one value into literal source text.
pub fn marshal_value(
    param: &str,
    value: &Value,
    hint: ParamHint,
    limits: &LimitsConfig,
) -> Result<String> {
    match value {
        Value::Null => Ok("missing value".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => number_literal(param, n),
        Value::String(s) => {
            check_string(param, s, hint, limits)?;
            Ok(quote_string(s))
        },
        Value::Array(items) => {
            if items.len() > limits.max_array_len {
                return Err(Error::Parameter {
                    param: param.to_string(),
                    reason: format!(
                        "array of {} elements exceeds max_array_len ({})",
                        items.len(),
                        limits.max_array_len
                    ),
                });
            }
            let literals = items
                .iter()
                .enumerate()
                .map(|(i, item)| array_element(param, i, item, hint, limits))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("{{{}}}", literals.join(", ")))
        },
        Value::Object(_) => {
            let json = serde_json::to_string(value).map_err(|e| Error::Parameter {
                param: param.to_string(),
                reason: format!("object could not be serialized: {e}"),
            })?;
            check_string(param, &json, hint, limits)?;
            Ok(quote_string(&json))
        },
    }
}

fn array_element(
    param: &str,
    index: usize,
    item: &Value,
    hint: ParamHint,
    limits: &LimitsConfig,
) -> Result<String> {
    match item {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            marshal_value(param, item, hint, limits)
        },
        other => Err(Error::Parameter {
            param: param.to_string(),
            reason: format!(
                "array element {index} is {}; only strings, numbers and booleans are allowed",
                type_name(other)
            ),
        }),
    }
}

fn number_literal(param: &str, n: &Number) -> Result<String> {
    if n.as_f64().is_some_and(|f| !f.is_finite()) {
        return Err(Error::Parameter {
            param: param.to_string(),
            reason: format!("non-finite number {n}"),
        });
    }
    Ok(n.to_string())
}

fn check_string(param: &str, s: &str, hint: ParamHint, limits: &LimitsConfig) -> Result<()> {
    let (limit, limit_name) = match hint {
        ParamHint::Value => (limits.max_string_bytes, "max_string_bytes"),
        ParamHint::Code => (limits.max_code_bytes, "max_code_bytes"),
    };
    if s.len() > limit {
        return Err(Error::Parameter {
            param: param.to_string(),
            reason: format!("{} bytes exceeds {limit_name} ({limit})", s.len()),
        });
    }
    Ok(())
}

/// Quote `s` as an AppleScript string expression.
///
/// ```
/// use script_relay::script::quote_string;
///
/// assert_eq!(quote_string("plain"), r#""plain""#);
/// assert_eq!(quote_string(r#"say "hi""#), r#""say " & quote & "hi" & quote & """#);
/// assert_eq!(quote_string(r"C:\tmp"), r#""C:\\tmp""#);
/// ```
pub fn quote_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .split('"')
        .map(|segment| format!("\"{segment}\""))
        .collect::<Vec<_>>()
        .join(" & quote & ")
}

/// Variable name for an input field: `p_` followed by the name with every
/// character outside `[A-Za-z0-9_]` replaced by `_`.
pub fn variable_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("p_{sanitized}")
}

fn unique_variable_name(name: &str, taken: &mut HashSet<String>) -> String {
    let base = variable_name(name);
    let mut candidate = base.clone();
    let mut index = 2;
    while taken.contains(&candidate) {
        candidate = format!("{base}_{index}");
        index += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
