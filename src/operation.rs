//! Operation definitions.
//!
//! An [`OperationDef`] describes one callable script: its payload kind,
//! schemas, body generator and per-operation settings. Definitions are built
//! once with [`OperationBuilder`] and shared behind an `Arc`.
//!
//! ```
//! use script_relay::operation::OperationDef;
//! use script_relay::PayloadKind;
//!
//! let op = OperationDef::builder("list_projects", PayloadKind::Rows)
//!     .body("set out to {}\nrepeat with p in projects\nset end of out to {name of p, id of p}\nend repeat\nreturn out")
//!     .columns(["name", "id"])
//!     .build()
//!     .unwrap();
//! assert_eq!(op.name(), "list_projects");
//! assert_eq!(op.kind(), PayloadKind::Rows);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::TimeoutOverrides;
use crate::error::{Error, Result};
use crate::protocol::PayloadKind;
use crate::schema::{Schema, SchemaRef};
use crate::script::ParamHint;

/// Produces the script body for a call's input.
pub type ScriptFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Maps one decoded row to an output value.
pub type RowFn = Arc<dyn Fn(&[String]) -> Value + Send + Sync>;

/// How decoded rows become records.
#[derive(Clone)]
pub enum RowMapping {
    /// Field `i` of each row becomes `columns[i]`; extra fields are dropped.
    Columns(Vec<String>),
    /// A function applied to each row.
    Custom(RowFn),
}

impl fmt::Debug for RowMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Columns(columns) => f.debug_tuple("Columns").field(columns).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// An immutable operation definition.
pub struct OperationDef {
    name: String,
    kind: PayloadKind,
    target_key: Option<String>,
    description: Option<String>,
    script: ScriptFn,
    input_schema: Option<SchemaRef>,
    output_schema: Option<SchemaRef>,
    param_hints: HashMap<String, ParamHint>,
    validate_input: bool,
    validate_output: bool,
    normalize_rows: Option<bool>,
    row_mapping: Option<RowMapping>,
    timeouts: TimeoutOverrides,
}

impl OperationDef {
    /// Start building an operation.
    pub fn builder(name: impl Into<String>, kind: PayloadKind) -> OperationBuilder {
        OperationBuilder::new(name, kind)
    }

    /// Operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload kind.
    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Queue key override; `None` means the engine's application.
    pub fn target_key(&self) -> Option<&str> {
        self.target_key.as_deref()
    }

    /// Free-form description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Script body for `input`, placeholders not yet substituted.
    pub fn render_body(&self, input: &Value) -> String {
        (self.script)(input)
    }

    /// Input schema.
    pub fn input_schema(&self) -> Option<&dyn Schema> {
        self.input_schema.as_deref()
    }

    /// Output schema.
    pub fn output_schema(&self) -> Option<&dyn Schema> {
        self.output_schema.as_deref()
    }

    /// Marshalling hints by parameter name.
    pub fn param_hints(&self) -> &HashMap<String, ParamHint> {
        &self.param_hints
    }

    /// Whether input validation is enabled for this operation.
    pub fn validates_input(&self) -> bool {
        self.validate_input
    }

    /// Whether output validation is enabled for this operation.
    pub fn validates_output(&self) -> bool {
        self.validate_output
    }

    /// Per-operation rows normalization override.
    pub fn normalize_rows(&self) -> Option<bool> {
        self.normalize_rows
    }

    /// Explicit row mapping.
    pub fn row_mapping(&self) -> Option<&RowMapping> {
        self.row_mapping.as_ref()
    }

    /// Per-operation timeout overrides.
    pub fn timeouts(&self) -> TimeoutOverrides {
        self.timeouts
    }
}

impl fmt::Debug for OperationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("target_key", &self.target_key)
            .field("has_input_schema", &self.input_schema.is_some())
            .field("has_output_schema", &self.output_schema.is_some())
            .field("row_mapping", &self.row_mapping)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Builder for [`OperationDef`].
pub struct OperationBuilder {
    name: String,
    kind: PayloadKind,
    target_key: Option<String>,
    description: Option<String>,
    script: Option<ScriptFn>,
    input_schema: Option<SchemaRef>,
    output_schema: Option<SchemaRef>,
    param_hints: HashMap<String, ParamHint>,
    validate_input: bool,
    validate_output: bool,
    normalize_rows: Option<bool>,
    row_mapping: Option<RowMapping>,
    timeouts: TimeoutOverrides,
}

impl OperationBuilder {
    fn new(name: impl Into<String>, kind: PayloadKind) -> Self {
        Self {
            name: name.into(),
            kind,
            target_key: None,
            description: None,
            script: None,
            input_schema: None,
            output_schema: None,
            param_hints: HashMap::new(),
            validate_input: true,
            validate_output: true,
            normalize_rows: None,
            row_mapping: None,
            timeouts: TimeoutOverrides::default(),
        }
    }

    /// Fixed script body with `${name}` placeholders.
    pub fn body(self, body: impl Into<String>) -> Self {
        let body = body.into();
        self.script(move |_| body.clone())
    }

    /// Body generated from the call input.
    pub fn script<F>(mut self, script: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.script = Some(Arc::new(script));
        self
    }

    /// Queue key, when it differs from the engine's application.
    pub fn target(mut self, key: impl Into<String>) -> Self {
        self.target_key = Some(key.into());
        self
    }

    /// Description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Input schema.
    pub fn input_schema(mut self, schema: impl Schema + 'static) -> Self {
        self.input_schema = Some(Arc::new(schema));
        self
    }

    /// Shared input schema.
    pub fn input_schema_ref(mut self, schema: SchemaRef) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Output schema.
    pub fn output_schema(mut self, schema: impl Schema + 'static) -> Self {
        self.output_schema = Some(Arc::new(schema));
        self
    }

    /// Shared output schema.
    pub fn output_schema_ref(mut self, schema: SchemaRef) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Marshalling hint for one parameter.
    pub fn param_hint(mut self, param: impl Into<String>, hint: ParamHint) -> Self {
        self.param_hints.insert(param.into(), hint);
        self
    }

    /// Mark a parameter as source code.
    pub fn code_param(self, param: impl Into<String>) -> Self {
        self.param_hint(param, ParamHint::Code)
    }

    /// Enable or disable input validation.
    pub fn validate_input(mut self, enabled: bool) -> Self {
        self.validate_input = enabled;
        self
    }

    /// Enable or disable output validation.
    pub fn validate_output(mut self, enabled: bool) -> Self {
        self.validate_output = enabled;
        self
    }

    /// Override rows normalization for this operation.
    pub fn normalize_rows(mut self, enabled: bool) -> Self {
        self.normalize_rows = Some(enabled);
        self
    }

    /// Map row fields to these names, in order.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.row_mapping = Some(RowMapping::Columns(
            columns.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Map each row with a function.
    pub fn map_rows<F>(mut self, map: F) -> Self
    where
        F: Fn(&[String]) -> Value + Send + Sync + 'static,
    {
        self.row_mapping = Some(RowMapping::Custom(Arc::new(map)));
        self
    }

    /// Script `with timeout`, rounded up to whole seconds.
    pub fn script_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout
            .as_secs()
            .saturating_add(u64::from(timeout.subsec_nanos() > 0));
        self.timeouts.script_secs = Some(secs);
        self
    }

    /// Process controller timeout.
    pub fn process_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.process_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Finish the definition.
    pub fn build(self) -> Result<Arc<OperationDef>> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("operation name must not be empty".to_string()));
        }
        let Some(script) = self.script else {
            return Err(Error::Config(format!(
                "operation '{}' has no script body",
                self.name
            )));
        };
        if self.row_mapping.is_some() && self.kind != PayloadKind::Rows {
            return Err(Error::Config(format!(
                "operation '{}' is {} but declares a row mapping",
                self.name, self.kind
            )));
        }
        if let Some(key) = &self.target_key {
            if key.trim().is_empty() {
                return Err(Error::Config(format!(
                    "operation '{}' has an empty target key",
                    self.name
                )));
            }
        }

        Ok(Arc::new(OperationDef {
            name: self.name,
            kind: self.kind,
            target_key: self.target_key,
            description: self.description,
            script,
            input_schema: self.input_schema,
            output_schema: self.output_schema,
            param_hints: self.param_hints,
            validate_input: self.validate_input,
            validate_output: self.validate_output,
            normalize_rows: self.normalize_rows,
            row_mapping: self.row_mapping,
            timeouts: self.timeouts,
        }))
    }
}

impl fmt::Debug for OperationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationBuilder")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}
