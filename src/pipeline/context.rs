use std::sync::Arc;

use serde_json::Value;

use crate::config::{EngineConfig, ResolvedTimeouts, TimeoutOverrides};
use crate::executor::{ProcessExecutor, ProcessOutput};
use crate::hooks::{CallInfo, ExecutionHooks};
use crate::logging::DebugFilter;
use crate::operation::OperationDef;
use crate::protocol::Payload;
use crate::queue::QueueRegistry;
use crate::script::MarshalledParam;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Timeout overrides taking precedence over everything else.
    pub timeouts: TimeoutOverrides,
    /// Override of `limits.max_code_bytes` for parameters hinted as code.
    pub max_code_bytes: Option<usize>,
    /// Queue key override.
    pub target_key: Option<String>,
    /// Override of `pipeline.wake_target`.
    pub wake_target: Option<bool>,
    /// Override of the retry bound.
    pub max_retries: Option<u32>,
}

impl RunOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `with timeout` for this call, in whole seconds.
    pub fn script_timeout_secs(mut self, secs: u64) -> Self {
        self.timeouts.script_secs = Some(secs);
        self
    }

    /// Process controller timeout for this call, in milliseconds.
    pub fn process_timeout_ms(mut self, ms: u64) -> Self {
        self.timeouts.process_ms = Some(ms);
        self
    }

    /// Code size ceiling for this call.
    pub fn max_code_bytes(mut self, bytes: usize) -> Self {
        self.max_code_bytes = Some(bytes);
        self
    }

    /// Run under a different queue key.
    pub fn target_key(mut self, key: impl Into<String>) -> Self {
        self.target_key = Some(key.into());
        self
    }

    /// Enable or disable the wake stanza.
    pub fn wake_target(mut self, wake: bool) -> Self {
        self.wake_target = Some(wake);
        self
    }

    /// Bound retries for this call.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// Shared collaborators available to every step.
pub struct PipelineEnv {
    /// Engine configuration.
    pub config: Arc<EngineConfig>,
    /// Per-key queues.
    pub registry: Arc<QueueRegistry<ProcessOutput>>,
    /// Interpreter runner.
    pub executor: Arc<dyn ProcessExecutor>,
    /// Call observers.
    pub hooks: Arc<dyn ExecutionHooks>,
    /// Operations whose scripts are logged in full.
    pub debug: DebugFilter,
}

impl std::fmt::Debug for PipelineEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEnv")
            .field("application", &self.config.application)
            .field("queues", &self.registry.len())
            .field("hooks", &self.hooks.name())
            .finish()
    }
}

/// State of one call as it moves through the steps.
#[derive(Debug)]
pub struct CallContext {
    /// Call identity.
    pub call: CallInfo,
    /// Operation being called.
    pub operation: Arc<OperationDef>,
    /// Caller input (replaced by the input schema's result).
    pub input: Value,
    /// Per-call options.
    pub options: RunOptions,
    /// Current attempt, starting at 1.
    pub attempt: u32,
    /// Marshalled parameters.
    pub params: Vec<MarshalledParam>,
    /// Assembled script.
    pub script: Option<String>,
    /// Effective timeouts.
    pub timeouts: Option<ResolvedTimeouts>,
    /// Interpreter output.
    pub process_output: Option<ProcessOutput>,
    /// Decoded payload.
    pub payload: Option<Payload>,
    /// Value handed back to the caller.
    pub output: Value,
}

impl CallContext {
    /// Fresh context for a call.
    pub fn new(call: CallInfo, operation: Arc<OperationDef>, input: Value, options: RunOptions) -> Self {
        Self {
            call,
            operation,
            input,
            options,
            attempt: 0,
            params: Vec::new(),
            script: None,
            timeouts: None,
            process_output: None,
            payload: None,
            output: Value::Null,
        }
    }

    /// Discard everything produced by a previous attempt.
    pub fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.params.clear();
        self.script = None;
        self.timeouts = None;
        self.process_output = None;
        self.payload = None;
        self.output = Value::Null;
    }
}
