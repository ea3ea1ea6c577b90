//! Error types for script execution.
//!
//! [`Error`] is the normalized taxonomy every failure is converted into before
//! it reaches a caller. [`RunError`] wraps an [`Error`] with the call context
//! (operation name, target key, payload kind) and is the failure half of
//! [`RunResult`](crate::RunResult).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::protocol::codes;
use crate::protocol::PayloadKind;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A single problem reported by a schema validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaIssue {
    /// JSON pointer of the offending value (empty for the root).
    pub path: String,
    /// Human-readable description.
    pub message: String,
}

impl SchemaIssue {
    /// Create an issue for the given path.
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

fn join_issues(issues: &[SchemaIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors produced while building, running or decoding a script.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller's input did not match the operation's input schema.
    #[error("Input validation failed for '{operation}': {}", join_issues(.issues))]
    InputValidation {
        /// Operation being called.
        operation: String,
        /// Issues reported by the schema.
        issues: Vec<SchemaIssue>,
    },

    /// The decoded result did not match the operation's output schema.
    #[error("Output validation failed for '{operation}': {}", join_issues(.issues))]
    OutputValidation {
        /// Operation being called.
        operation: String,
        /// Issues reported by the schema.
        issues: Vec<SchemaIssue>,
    },

    /// A parameter could not be turned into a script literal.
    #[error("Invalid parameter '{param}': {reason}")]
    Parameter {
        /// Input field name.
        param: String,
        /// Why marshalling refused it.
        reason: String,
    },

    /// The script finished without returning a value.
    #[error("{message}")]
    MissingReturn {
        /// Canonical or script-provided message.
        message: String,
    },

    /// The script returned a value of the wrong shape for its payload kind.
    #[error("{message}")]
    InvalidReturnType {
        /// Kind the operation expected.
        kind: PayloadKind,
        /// Canonical or script-provided message.
        message: String,
    },

    /// An action script returned something other than a known action code.
    #[error("Invalid action code: '{code}'")]
    InvalidActionCode {
        /// The offending text.
        code: String,
    },

    /// The script raised an error the engine has no dedicated kind for.
    #[error("Script error {code}: {message}")]
    Script {
        /// Error number reported by the script.
        code: i32,
        /// Error message reported by the script.
        message: String,
    },

    /// The script's own `with timeout` block expired.
    #[error("Script timed out inside '{target_key}' while running '{operation}': {message}")]
    RuntimeTimeout {
        /// Queue key the call ran under.
        target_key: String,
        /// Operation being called.
        operation: String,
        /// Message reported by the interpreter.
        message: String,
    },

    /// The interpreter process outlived its controller timeout and was killed.
    #[error("Process for '{operation}' on '{target_key}' exceeded {}ms", .timeout.as_millis())]
    ControllerTimeout {
        /// Queue key the call ran under.
        target_key: String,
        /// Operation being called.
        operation: String,
        /// Timeout that was configured for the process.
        timeout: Duration,
    },

    /// The interpreter output was not a valid envelope.
    #[error("Parse error: {message}")]
    Parse {
        /// What was wrong with the envelope.
        message: String,
    },

    /// Failure outside the classified categories (spawn failures, crashes).
    #[error("{message}")]
    Unclassified {
        /// Description of the failure.
        message: String,
    },

    /// The task was removed from its queue by `clear()` before it started.
    #[error("Task cancelled on queue '{queue}': {cause}")]
    Cancelled {
        /// Queue that was cleared.
        queue: String,
        /// Error supplied to `clear()`.
        cause: Arc<Error>,
    },

    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification of an [`Error`], used by stats and retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// [`Error::InputValidation`]
    InputValidation,
    /// [`Error::OutputValidation`]
    OutputValidation,
    /// [`Error::Parameter`]
    Parameter,
    /// [`Error::MissingReturn`]
    MissingReturn,
    /// [`Error::InvalidReturnType`]
    InvalidReturnType,
    /// [`Error::InvalidActionCode`]
    InvalidActionCode,
    /// [`Error::Script`]
    Script,
    /// [`Error::RuntimeTimeout`]
    RuntimeTimeout,
    /// [`Error::ControllerTimeout`]
    ControllerTimeout,
    /// [`Error::Parse`]
    Parse,
    /// [`Error::Unclassified`]
    Unclassified,
    /// [`Error::Cancelled`]
    Cancelled,
    /// [`Error::Config`]
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InputValidation => "input_validation",
            Self::OutputValidation => "output_validation",
            Self::Parameter => "parameter",
            Self::MissingReturn => "missing_return",
            Self::InvalidReturnType => "invalid_return_type",
            Self::InvalidActionCode => "invalid_action_code",
            Self::Script => "script",
            Self::RuntimeTimeout => "runtime_timeout",
            Self::ControllerTimeout => "controller_timeout",
            Self::Parse => "parse",
            Self::Unclassified => "unclassified",
            Self::Cancelled => "cancelled",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Build an [`Error`] from an `ERR` envelope.
    ///
    /// Known codes get their canonical message; unknown codes keep the raw
    /// message. Code `-1` is reserved for envelopes the codec could not read.
    ///
    /// # Examples
    ///
    /// ```
    /// use script_relay::{Error, ErrorKind};
    ///
    /// let err = Error::from_wire(5, "bad", "Things3", "complete_todo");
    /// assert_eq!(err.kind(), ErrorKind::InvalidActionCode);
    ///
    /// let err = Error::from_wire(-1728, "Can't get item 1", "Things3", "list");
    /// assert_eq!(err.code(), Some(-1728));
    /// ```
    pub fn from_wire(
        code: i32,
        message: &str,
        target_key: &str,
        operation: &str,
    ) -> Self {
        let canonical = codes::canonical_message(code).map(str::to_string);
        match code {
            codes::TIMEOUT => Self::RuntimeTimeout {
                target_key: target_key.to_string(),
                operation: operation.to_string(),
                message: if message.is_empty() {
                    canonical.unwrap_or_default()
                } else {
                    message.to_string()
                },
            },
            codes::MISSING_RETURN => Self::MissingReturn {
                message: canonical.unwrap_or_default(),
            },
            codes::INVALID_ROW_TYPE => Self::InvalidReturnType {
                kind: PayloadKind::Rows,
                message: canonical.unwrap_or_default(),
            },
            codes::INVALID_SECTION_TYPE => Self::InvalidReturnType {
                kind: PayloadKind::Sections,
                message: canonical.unwrap_or_default(),
            },
            codes::INVALID_SCALAR_TYPE => Self::InvalidReturnType {
                kind: PayloadKind::Scalar,
                message: canonical.unwrap_or_default(),
            },
            codes::INVALID_ACTION_CODE => Self::InvalidActionCode {
                code: message.to_string(),
            },
            codes::UNPARSEABLE => Self::Parse {
                message: message.to_string(),
            },
            _ => Self::Script {
                code,
                message: if message.is_empty() {
                    codes::UNKNOWN_ERROR.to_string()
                } else {
                    message.to_string()
                },
            },
        }
    }

    /// Build an [`Error`] from an `ERR` envelope the script itself wrote.
    ///
    /// Same as [`from_wire`](Self::from_wire), except that code `-1` raised by
    /// the script is unclassified rather than a parse failure.
    ///
    /// ```
    /// use script_relay::{Error, ErrorKind};
    ///
    /// let err = Error::from_script(-1, "disk full", "Things3", "export");
    /// assert_eq!(err.kind(), ErrorKind::Unclassified);
    /// assert_eq!(err.to_string(), "disk full");
    /// ```
    pub fn from_script(code: i32, message: &str, target_key: &str, operation: &str) -> Self {
        if code == codes::UNPARSEABLE {
            Self::unclassified(message)
        } else {
            Self::from_wire(code, message, target_key, operation)
        }
    }

    /// Wire code associated with this error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::RuntimeTimeout { .. } | Self::ControllerTimeout { .. } => Some(codes::TIMEOUT),
            Self::MissingReturn { .. } => Some(codes::MISSING_RETURN),
            Self::InvalidReturnType { kind, .. } => Some(match kind {
                PayloadKind::Rows => codes::INVALID_ROW_TYPE,
                PayloadKind::Sections => codes::INVALID_SECTION_TYPE,
                PayloadKind::Scalar | PayloadKind::Action => codes::INVALID_SCALAR_TYPE,
            }),
            Self::InvalidActionCode { .. } => Some(codes::INVALID_ACTION_CODE),
            Self::Script { code, .. } => Some(*code),
            Self::Parse { .. } | Self::Unclassified { .. } => Some(codes::UNPARSEABLE),
            Self::Cancelled { cause, .. } => cause.code(),
            Self::InputValidation { .. }
            | Self::OutputValidation { .. }
            | Self::Parameter { .. }
            | Self::Config(_) => None,
        }
    }

    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputValidation { .. } => ErrorKind::InputValidation,
            Self::OutputValidation { .. } => ErrorKind::OutputValidation,
            Self::Parameter { .. } => ErrorKind::Parameter,
            Self::MissingReturn { .. } => ErrorKind::MissingReturn,
            Self::InvalidReturnType { .. } => ErrorKind::InvalidReturnType,
            Self::InvalidActionCode { .. } => ErrorKind::InvalidActionCode,
            Self::Script { .. } => ErrorKind::Script,
            Self::RuntimeTimeout { .. } => ErrorKind::RuntimeTimeout,
            Self::ControllerTimeout { .. } => ErrorKind::ControllerTimeout,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Unclassified { .. } => ErrorKind::Unclassified,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns `true` for either timeout kind.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::RuntimeTimeout { .. } | Self::ControllerTimeout { .. }
        )
    }

    /// Returns `true` if the task was rejected by a queue `clear()`.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Schema issues for validation errors, empty otherwise.
    pub fn issues(&self) -> &[SchemaIssue] {
        match self {
            Self::InputValidation { issues, .. } | Self::OutputValidation { issues, .. } => issues,
            _ => &[],
        }
    }

    /// Shorthand for [`Error::Unclassified`].
    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::Unclassified {
            message: message.into(),
        }
    }
}

/// Failure half of a [`RunResult`](crate::RunResult).
///
/// Carries the normalized [`Error`] plus the context of the call that
/// produced it. `message` is the error's display text at the time of
/// conversion.
#[derive(Debug)]
pub struct RunError {
    /// Display text of `error`.
    pub message: String,
    /// Operation that was called.
    pub operation_name: String,
    /// Queue key the call ran under.
    pub target_key: String,
    /// Payload kind of the operation.
    pub payload_kind: PayloadKind,
    /// Wire code, when the error has one.
    pub code: Option<i32>,
    /// The normalized error.
    pub error: Error,
}

impl RunError {
    /// Wrap `error` with its call context.
    pub fn new(
        error: Error,
        operation_name: impl Into<String>,
        target_key: impl Into<String>,
        payload_kind: PayloadKind,
    ) -> Self {
        Self {
            message: error.to_string(),
            operation_name: operation_name.into(),
            target_key: target_key.into(),
            payload_kind,
            code: error.code(),
            error,
        }
    }

    /// Coarse classification of the wrapped error.
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Returns `true` for either timeout kind.
    pub fn is_timeout(&self) -> bool {
        self.error.is_timeout()
    }

    /// Give back the stored error, e.g. to propagate it with `?`.
    pub fn into_error(self) -> Error {
        self.error
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} on {}, {}]",
            self.message, self.operation_name, self.target_key, self.payload_kind
        )
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_use_canonical_messages() {
        let err = Error::from_wire(2, "whatever", "App", "op");
        assert_eq!(err.kind(), ErrorKind::MissingReturn);
        assert_eq!(err.to_string(), codes::canonical_message(2).unwrap());

        let err = Error::from_wire(4, "", "App", "op");
        match err {
            Error::InvalidReturnType { kind, .. } => assert_eq!(kind, PayloadKind::Sections),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_code_falls_back_to_raw_message() {
        let err = Error::from_wire(-1728, "Can't get window 1", "App", "op");
        assert_eq!(err.code(), Some(-1728));
        assert!(err.to_string().contains("Can't get window 1"));

        let err = Error::from_wire(42, "", "App", "op");
        assert!(err.to_string().contains("Unknown error"));
    }

    #[test]
    fn script_raised_minus_one_is_unclassified() {
        let err = Error::from_script(-1, "custom failure", "App", "op");
        assert_eq!(err.kind(), ErrorKind::Unclassified);
        assert_eq!(err.code(), Some(-1));

        assert_eq!(Error::from_wire(-1, "Malformed response", "App", "op").kind(), ErrorKind::Parse);
        assert_eq!(Error::from_script(5, "maybe", "App", "op").kind(), ErrorKind::InvalidActionCode);
    }

    #[test]
    fn timeout_predicates() {
        let runtime = Error::from_wire(1, "timed out", "App", "op");
        assert!(runtime.is_timeout());
        assert_eq!(runtime.kind(), ErrorKind::RuntimeTimeout);

        let controller = Error::ControllerTimeout {
            target_key: "App".to_string(),
            operation: "op".to_string(),
            timeout: Duration::from_secs(3),
        };
        assert!(controller.is_timeout());
        assert!(controller.to_string().contains("3000ms"));

        assert!(!Error::unclassified("boom").is_timeout());
    }

    #[test]
    fn cancelled_is_distinguishable() {
        let err = Error::Cancelled {
            queue: "App".to_string(),
            cause: Arc::new(Error::unclassified("shutting down")),
        };
        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("shutting down"));
    }

    #[test]
    fn run_error_carries_context() {
        let err = RunError::new(
            Error::InputValidation {
                operation: "add_todo".to_string(),
                issues: vec![SchemaIssue::new("/title", "is required")],
            },
            "add_todo",
            "Things3",
            PayloadKind::Action,
        );
        assert_eq!(err.operation_name, "add_todo");
        assert_eq!(err.target_key, "Things3");
        assert_eq!(err.code, None);
        assert_eq!(err.error.issues().len(), 1);
        assert!(err.message.contains("/title: is required"));
        assert!(err.to_string().contains("Things3"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
        assert_send_sync::<RunError>();
    }
}
