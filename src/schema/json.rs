use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{describe_json_schema, Schema, SchemaDescriptor};
use crate::error::{Error, Result, SchemaIssue};

/// [`Schema`] backed by a JSON Schema document.
///
/// Validation leaves the value unchanged; the descriptor is derived from the
/// document once at construction.
///
/// ```
/// use script_relay::schema::{JsonSchema, Schema};
/// use serde_json::json;
///
/// let schema = JsonSchema::new(json!({
///     "type": "object",
///     "properties": { "title": { "type": "string" } },
///     "required": ["title"]
/// }))
/// .unwrap();
/// assert!(schema.validate(&json!({"title": "Buy milk"})).is_ok());
/// assert_eq!(schema.validate(&json!({})).unwrap_err().len(), 1);
/// ```
#[derive(Clone)]
pub struct JsonSchema {
    document: Arc<Value>,
    validator: Arc<jsonschema::Validator>,
    descriptor: Option<SchemaDescriptor>,
}

impl JsonSchema {
    /// Compile a schema document.
    pub fn new(document: Value) -> Result<Self> {
        let validator = jsonschema::validator_for(&document)
            .map_err(|e| Error::Config(format!("invalid JSON schema: {e}")))?;
        let descriptor = describe_json_schema(&document);
        Ok(Self {
            document: Arc::new(document),
            validator: Arc::new(validator),
            descriptor,
        })
    }

    /// Schema generated from a Rust type.
    #[cfg(feature = "schema-generation")]
    pub fn for_type<T: schemars::JsonSchema>() -> Result<Self> {
        let document = serde_json::to_value(schemars::schema_for!(T))
            .map_err(|e| Error::Config(format!("schema for type could not be serialized: {e}")))?;
        Self::new(document)
    }

    /// The schema document.
    pub fn document(&self) -> &Value {
        &self.document
    }
}

impl Schema for JsonSchema {
    fn validate(&self, value: &Value) -> std::result::Result<Value, Vec<SchemaIssue>> {
        let issues: Vec<SchemaIssue> = self
            .validator
            .iter_errors(value)
            .map(|e| SchemaIssue::new("", e.to_string()))
            .collect();
        if issues.is_empty() {
            Ok(value.clone())
        } else {
            Err(issues)
        }
    }

    fn describe(&self) -> Option<SchemaDescriptor> {
        self.descriptor.clone()
    }
}

impl fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchema")
            .field("document", &self.document)
            .finish()
    }
}
