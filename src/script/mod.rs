//! Script generation.
//!
//! [`marshal`] turns caller input into AppleScript literals and
//! [`assemble`] wraps the caller's body with parameters, timeouts, the
//! result-encoding wrapper and the error trap.

pub mod assemble;
pub mod marshal;

use serde::{Deserialize, Serialize};

pub use assemble::{assemble, AssembleRequest};
pub use marshal::{marshal_params, marshal_value, quote_string, variable_name};

/// How a parameter should be marshalled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamHint {
    /// Ordinary value, subject to `max_string_bytes`.
    #[default]
    Value,
    /// Source text (e.g. a user-supplied snippet), subject to
    /// `max_code_bytes` instead.
    Code,
}

/// One input field turned into a script variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarshalledParam {
    /// Generated variable name, `p_<sanitized>`.
    pub var_name: String,
    /// Literal source text assigned to the variable.
    pub literal: String,
    /// Input field the parameter came from.
    pub source: String,
}
