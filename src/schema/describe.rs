//! Structural description of JSON Schema documents.

use serde_json::{Map, Value};

use super::{ScalarKind, SchemaDescriptor};

const MAX_REF_DEPTH: usize = 32;

/// Describe a JSON Schema document.
///
/// Nullable wrappers (`anyOf`/`oneOf` with a `null` branch, `type` lists
/// containing `"null"`) are unwrapped and local `$ref`s are followed.
/// Returns `None` when `root` is not a schema.
///
/// ```
/// use script_relay::schema::describe_json_schema;
/// use serde_json::json;
///
/// let schema = json!({
///     "type": "array",
///     "items": {
///         "type": "object",
///         "properties": {
///             "name": { "type": "string" },
///             "due": { "anyOf": [{ "type": "integer" }, { "type": "null" }] }
///         }
///     }
/// });
/// let described = describe_json_schema(&schema).unwrap();
/// assert_eq!(
///     described.row_fields(),
///     Some(vec!["name".to_string(), "due".to_string()])
/// );
/// ```
pub fn describe_json_schema(root: &Value) -> Option<SchemaDescriptor> {
    match root {
        Value::Object(_) | Value::Bool(_) => Some(describe(root, root, 0)),
        _ => None,
    }
}

fn describe(node: &Value, root: &Value, depth: usize) -> SchemaDescriptor {
    let any = SchemaDescriptor::Scalar(ScalarKind::Any);
    if depth > MAX_REF_DEPTH {
        return any;
    }
    let Some(schema) = node.as_object() else {
        return any;
    };

    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        return match resolve_ref(root, reference) {
            Some(target) => describe(target, root, depth + 1),
            None => any,
        };
    }

    for combinator in ["anyOf", "oneOf"] {
        if let Some(branches) = schema.get(combinator).and_then(Value::as_array) {
            let non_null: Vec<&Value> = branches.iter().filter(|b| !is_null_schema(b)).collect();
            return match non_null.as_slice() {
                [single] => describe(single, root, depth + 1),
                _ => any,
            };
        }
    }

    match declared_type(schema) {
        Some("string") => SchemaDescriptor::Scalar(ScalarKind::String),
        Some("number") => SchemaDescriptor::Scalar(ScalarKind::Number),
        Some("integer") => SchemaDescriptor::Scalar(ScalarKind::Integer),
        Some("boolean") => SchemaDescriptor::Scalar(ScalarKind::Boolean),
        Some("array") => describe_array(schema, root, depth),
        Some("object") => describe_object(schema, root, depth),
        Some(_) => any,
        None if schema.contains_key("properties") => describe_object(schema, root, depth),
        None if schema.contains_key("items") || schema.contains_key("prefixItems") => {
            describe_array(schema, root, depth)
        },
        None => any,
    }
}

/// The single non-null type, if any.
fn declared_type(schema: &Map<String, Value>) -> Option<&str> {
    match schema.get("type")? {
        Value::String(t) => Some(t.as_str()),
        Value::Array(types) => {
            let non_null: Vec<&str> = types
                .iter()
                .filter_map(Value::as_str)
                .filter(|t| *t != "null")
                .collect();
            match non_null.as_slice() {
                [single] => Some(*single),
                _ => Some("any"),
            }
        },
        _ => None,
    }
}

fn describe_array(schema: &Map<String, Value>, root: &Value, depth: usize) -> SchemaDescriptor {
    let tuple = schema
        .get("prefixItems")
        .or_else(|| schema.get("items").filter(|items| items.is_array()))
        .and_then(Value::as_array);
    if let Some(positions) = tuple {
        return SchemaDescriptor::Tuple(
            positions
                .iter()
                .map(|p| describe(p, root, depth + 1))
                .collect(),
        );
    }
    let element = schema
        .get("items")
        .map(|items| describe(items, root, depth + 1))
        .unwrap_or(SchemaDescriptor::Scalar(ScalarKind::Any));
    SchemaDescriptor::Array(Box::new(element))
}

fn describe_object(schema: &Map<String, Value>, root: &Value, depth: usize) -> SchemaDescriptor {
    let fields = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, p)| (name.clone(), describe(p, root, depth + 1)))
                .collect()
        })
        .unwrap_or_default();
    SchemaDescriptor::Object(fields)
}

fn is_null_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("null")
}

fn resolve_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    match reference.strip_prefix('#')? {
        "" => Some(root),
        pointer => root.pointer(pointer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn scalar(kind: ScalarKind) -> SchemaDescriptor {
        SchemaDescriptor::Scalar(kind)
    }

    #[test]
    fn nullable_type_lists_are_unwrapped() {
        let d = describe_json_schema(&json!({"type": ["integer", "null"]})).unwrap();
        assert_eq!(d, scalar(ScalarKind::Integer));
        let d = describe_json_schema(&json!({"type": ["integer", "string"]})).unwrap();
        assert_eq!(d, scalar(ScalarKind::Any));
    }

    #[test]
    fn tuples_from_prefix_items_and_item_lists() {
        let expected = SchemaDescriptor::Tuple(vec![
            scalar(ScalarKind::Number),
            scalar(ScalarKind::Boolean),
        ]);
        let modern = json!({"type": "array", "prefixItems": [{"type": "number"}, {"type": "boolean"}]});
        let legacy = json!({"type": "array", "items": [{"type": "number"}, {"type": "boolean"}]});
        assert_eq!(describe_json_schema(&modern).unwrap(), expected);
        assert_eq!(describe_json_schema(&legacy).unwrap(), expected);
    }

    #[test]
    fn local_refs_are_followed() {
        let schema = json!({
            "type": "array",
            "items": {"$ref": "#/$defs/Todo"},
            "$defs": {
                "Todo": {
                    "type": "object",
                    "properties": {
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "parent": {"oneOf": [{"$ref": "#/$defs/Todo"}, {"type": "null"}]}
                    }
                }
            }
        });
        let d = describe_json_schema(&schema).unwrap();
        let SchemaDescriptor::Array(element) = d else {
            panic!("expected array");
        };
        let SchemaDescriptor::Object(fields) = *element else {
            panic!("expected object");
        };
        assert_eq!(fields[0].0, "tags");
        assert_eq!(
            fields[0].1,
            SchemaDescriptor::Array(Box::new(scalar(ScalarKind::String)))
        );
        assert!(matches!(fields[1].1, SchemaDescriptor::Object(_)));
    }

    #[test]
    fn unknown_shapes_degrade_to_any() {
        assert_eq!(describe_json_schema(&json!(true)).unwrap(), scalar(ScalarKind::Any));
        assert_eq!(
            describe_json_schema(&json!({"$ref": "#/missing"})).unwrap(),
            scalar(ScalarKind::Any)
        );
        assert_eq!(
            describe_json_schema(&json!({"anyOf": [{"type": "string"}, {"type": "integer"}]}))
                .unwrap(),
            scalar(ScalarKind::Any)
        );
        assert_eq!(describe_json_schema(&json!(42)), None);
    }

    #[test]
    fn self_referencing_schema_terminates() {
        let schema = json!({"$ref": "#"});
        assert_eq!(describe_json_schema(&schema).unwrap(), scalar(ScalarKind::Any));
    }
}
