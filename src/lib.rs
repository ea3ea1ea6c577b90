//! Serialized, injection-safe execution of automation scripts.
//!
//! `script-relay` runs AppleScript operations against named applications
//! through `osascript`. Calls to the same application are queued and run one
//! at a time; caller parameters are turned into script literals that cannot
//! break out of their quotes; results come back through a small
//! separator-based envelope and are decoded, mapped and validated into JSON.
//!
//! # Overview
//!
//! An [`OperationDef`] describes one script: its body, payload kind and
//! optional schemas. A [`Pipeline`] runs operations:
//!
//! 1. validate the input,
//! 2. marshal parameters and assemble the script,
//! 3. queue it behind other calls to the same target and run the interpreter,
//! 4. decode the envelope,
//! 5. map and normalize rows,
//! 6. validate the output.
//!
//! Every failure is converted into an [`Error`] and handed back as a
//! [`RunError`] carrying the call's context.
//!
//! # Module Organization
//!
//! - [`queue`] - Per-key FIFO queues with cancellation epochs
//! - [`script`] - Parameter marshalling and script assembly
//! - [`protocol`] - Result envelope codec and error codes
//! - [`pipeline`] - The call pipeline and its steps
//! - [`schema`] - Schema trait, descriptors and normalization
//! - [`executor`] - Interpreter process execution
//! - [`config`] - Engine configuration (TOML + environment)
//! - [`hooks`], [`stats`], [`retry`], [`logging`] - Observability and retry

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod logging;
pub mod operation;
pub mod pipeline;
pub mod protocol;
pub mod queue;
pub mod retry;
pub mod schema;
pub mod script;
pub mod stats;

// Re-exports for ergonomic access
pub use config::{ConfigError, EngineConfig};
pub use error::{Error, ErrorKind, Result, RunError, SchemaIssue};
pub use operation::{OperationBuilder, OperationDef};
pub use pipeline::{Pipeline, PipelineBuilder, RunOptions, RunResult};
pub use protocol::{ActionCode, Payload, PayloadKind};
pub use queue::{PerKeyQueue, QueueRegistry, TaskHandle, TaskMetadata};
pub use retry::RetryPolicy;
pub use schema::{Schema, SchemaDescriptor};
pub use stats::{StatsCollector, StatsSnapshot};

#[cfg(feature = "validation")]
pub use schema::JsonSchema;
