//! Schema handles used by operations.
//!
//! The engine needs two things from a schema: validation (which may also
//! transform the value) and an optional structural description used for row
//! mapping and normalization. Everything schema-library specific stays
//! behind the [`Schema`] trait; the rest of the crate only sees the closed
//! [`SchemaDescriptor`].

mod describe;
#[cfg(feature = "validation")]
mod json;
pub mod normalize;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::SchemaIssue;

pub use describe::describe_json_schema;
#[cfg(feature = "validation")]
pub use json::JsonSchema;

/// Scalar leaf of a [`SchemaDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Text.
    String,
    /// Any number.
    Number,
    /// Whole number.
    Integer,
    /// `true` / `false`.
    Boolean,
    /// Unknown or unconstrained.
    Any,
}

/// Structural description of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDescriptor {
    /// A single value.
    Scalar(ScalarKind),
    /// Homogeneous list.
    Array(Box<SchemaDescriptor>),
    /// Fixed-length list, one descriptor per position.
    Tuple(Vec<SchemaDescriptor>),
    /// Record with fields in declaration order.
    Object(Vec<(String, SchemaDescriptor)>),
}

impl SchemaDescriptor {
    /// Field names of the element record when `self` is `Array(Object)`.
    pub fn row_fields(&self) -> Option<Vec<String>> {
        match self {
            Self::Array(element) => match element.as_ref() {
                Self::Object(fields) if !fields.is_empty() => {
                    Some(fields.iter().map(|(name, _)| name.clone()).collect())
                },
                _ => None,
            },
            _ => None,
        }
    }
}

/// A validation schema.
pub trait Schema: Send + Sync {
    /// Validate `value`, returning the (possibly transformed) value or the
    /// issues found.
    fn validate(&self, value: &Value) -> Result<Value, Vec<SchemaIssue>>;

    /// Structural description, when the schema can provide one.
    fn describe(&self) -> Option<SchemaDescriptor> {
        None
    }
}

/// Shared schema handle.
pub type SchemaRef = Arc<dyn Schema>;

type ValidateFn = dyn Fn(&Value) -> Result<Value, Vec<SchemaIssue>> + Send + Sync;

/// [`Schema`] built from a closure.
///
/// ```
/// use script_relay::schema::{FnSchema, Schema};
/// use script_relay::SchemaIssue;
/// use serde_json::json;
///
/// let positive = FnSchema::new(|v| match v.as_i64() {
///     Some(n) if n > 0 => Ok(v.clone()),
///     _ => Err(vec![SchemaIssue::new("", "must be a positive integer")]),
/// });
/// assert!(positive.validate(&json!(3)).is_ok());
/// assert!(positive.validate(&json!(-3)).is_err());
/// ```
#[derive(Clone)]
pub struct FnSchema {
    validate: Arc<ValidateFn>,
    descriptor: Option<SchemaDescriptor>,
}

impl FnSchema {
    /// Wrap a validation closure.
    pub fn new<F>(validate: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, Vec<SchemaIssue>> + Send + Sync + 'static,
    {
        Self {
            validate: Arc::new(validate),
            descriptor: None,
        }
    }

    /// Accept every value unchanged, describing it as `descriptor`.
    pub fn accepting(descriptor: SchemaDescriptor) -> Self {
        Self::new(|v| Ok(v.clone())).with_descriptor(descriptor)
    }

    /// Attach a structural description.
    pub fn with_descriptor(mut self, descriptor: SchemaDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }
}

impl Schema for FnSchema {
    fn validate(&self, value: &Value) -> Result<Value, Vec<SchemaIssue>> {
        (self.validate)(value)
    }

    fn describe(&self) -> Option<SchemaDescriptor> {
        self.descriptor.clone()
    }
}

impl fmt::Debug for FnSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSchema")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}
