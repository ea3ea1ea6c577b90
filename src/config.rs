//! Engine configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`.script-relay.toml`)
//! 2. Environment variables (with `SCRIPT_RELAY_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [engine]
//! application = "Things3"
//!
//! [engine.timeouts]
//! script_secs = 20
//! process_ms = 25000
//!
//! [engine.timeouts.rows]
//! script_secs = 60
//!
//! [engine.limits]
//! max_string_bytes = 10000
//!
//! [engine.retry]
//! max_retries = 1
//! delay_ms = 250
//!
//! [engine.logging]
//! level = "info"
//! debug_patterns = ["list_*"]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::PayloadKind;

/// File read by [`EngineConfig::load`].
pub const CONFIG_FILE: &str = ".script-relay.toml";

/// Script timeout used when nothing else is configured.
pub const FALLBACK_SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Gap between script and process timeouts when the process timeout is
/// derived rather than configured.
pub const PROCESS_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Smallest gap enforced between a configured process timeout and the
/// script timeout.
pub const MIN_PROCESS_TIMEOUT_GAP: Duration = Duration::from_secs(1);

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file '{path}': {error}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O error text.
        error: String,
    },

    /// The TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// The configuration parsed but is not usable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Application scripts are addressed to (`tell application "..."`).
    /// Also the queue key calls are serialized under.
    pub application: String,

    /// Interpreter process settings.
    pub interpreter: InterpreterConfig,

    /// Script and process timeouts.
    pub timeouts: TimeoutConfig,

    /// Parameter size limits.
    pub limits: LimitsConfig,

    /// Retry behavior.
    pub retry: RetryConfig,

    /// Pipeline step toggles.
    pub pipeline: PipelineConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            application: "Finder".to_string(),
            interpreter: InterpreterConfig::default(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Default configuration targeting `application`.
    pub fn for_application(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            ..Self::default()
        }
    }

    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML configuration file
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(contents) = std::fs::read_to_string(CONFIG_FILE) {
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML content with an `[engine]` table.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct FullConfig {
            #[serde(default)]
            engine: EngineConfig,
        }

        let full: FullConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(full.engine)
    }

    /// Apply `SCRIPT_RELAY_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(application) = lookup("SCRIPT_RELAY_APPLICATION") {
            self.application = application;
        }
        if let Some(program) = lookup("SCRIPT_RELAY_INTERPRETER") {
            self.interpreter.program = program;
        }

        if let Some(v) = lookup("SCRIPT_RELAY_SCRIPT_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.timeouts.script_secs = Some(secs);
            }
        }
        if let Some(v) = lookup("SCRIPT_RELAY_PROCESS_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.timeouts.process_ms = Some(ms);
            }
        }

        if let Some(v) = lookup("SCRIPT_RELAY_MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                self.retry.max_retries = n;
            }
        }
        if let Some(v) = lookup("SCRIPT_RELAY_RETRY_DELAY_MS") {
            if let Ok(ms) = v.parse() {
                self.retry.delay_ms = ms;
            }
        }

        if let Some(v) = lookup("SCRIPT_RELAY_WAKE_TARGET") {
            if let Ok(b) = v.parse() {
                self.pipeline.wake_target = b;
            }
        }

        if let Some(level) = lookup("SCRIPT_RELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(patterns) = lookup("SCRIPT_RELAY_DEBUG") {
            self.logging.debug_patterns = patterns
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application.trim().is_empty() {
            return Err(ConfigError::Invalid("application must not be empty".into()));
        }
        if self.interpreter.program.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "interpreter.program must not be empty".into(),
            ));
        }
        if self.interpreter.max_output_bytes == 0 {
            return Err(ConfigError::Invalid(
                "interpreter.max_output_bytes must be positive".into(),
            ));
        }
        if let (Some(script), Some(process)) = (self.timeouts.script_secs, self.timeouts.process_ms)
        {
            if process <= script.saturating_mul(1000) {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.process_ms ({process}) must exceed timeouts.script_secs ({script}s)"
                )));
            }
        }
        Ok(())
    }

    /// Serialize the configuration to TOML under an `[engine]` table.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        #[derive(Serialize)]
        struct FullConfig<'a> {
            engine: &'a EngineConfig,
        }

        toml::to_string_pretty(&FullConfig { engine: self })
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Interpreter process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Executable to spawn.
    pub program: String,
    /// Arguments; the script text is written to stdin.
    pub args: Vec<String>,
    /// Output beyond this many bytes fails the call.
    pub max_output_bytes: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            program: "osascript".to_string(),
            args: vec!["-".to_string()],
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Timeout overrides for one payload kind, or for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutOverrides {
    /// Script `with timeout` in seconds.
    pub script_secs: Option<u64>,
    /// Process controller timeout in milliseconds.
    pub process_ms: Option<u64>,
}

/// Script and process timeouts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Global script timeout in seconds.
    pub script_secs: Option<u64>,
    /// Global process timeout in milliseconds.
    pub process_ms: Option<u64>,
    /// Overrides for scalar operations.
    pub scalar: TimeoutOverrides,
    /// Overrides for action operations.
    pub action: TimeoutOverrides,
    /// Overrides for rows operations.
    pub rows: TimeoutOverrides,
    /// Overrides for sections operations.
    pub sections: TimeoutOverrides,
}

/// Effective timeouts for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedTimeouts {
    /// Inner script timeout (whole seconds, as AppleScript expects).
    pub script: Duration,
    /// Outer process timeout.
    pub process: Duration,
    /// `true` if the process timeout was raised above the script timeout.
    pub adjusted: bool,
}

impl TimeoutConfig {
    /// Overrides configured for `kind`.
    pub fn for_kind(&self, kind: PayloadKind) -> TimeoutOverrides {
        match kind {
            PayloadKind::Scalar => self.scalar,
            PayloadKind::Action => self.action,
            PayloadKind::Rows => self.rows,
            PayloadKind::Sections => self.sections,
        }
    }

    /// Resolve effective timeouts.
    ///
    /// Precedence for each timeout: per-call > per-operation > per-kind >
    /// global > fallback. The process timeout always ends up strictly larger
    /// than the script timeout.
    pub fn resolve(
        &self,
        kind: PayloadKind,
        operation: TimeoutOverrides,
        call: TimeoutOverrides,
    ) -> ResolvedTimeouts {
        let per_kind = self.for_kind(kind);

        let script = call
            .script_secs
            .or(operation.script_secs)
            .or(per_kind.script_secs)
            .or(self.script_secs)
            .map(Duration::from_secs)
            .unwrap_or(FALLBACK_SCRIPT_TIMEOUT);
        // `with timeout of 0 seconds` expires immediately.
        let script = script.max(Duration::from_secs(1));

        let configured = call
            .process_ms
            .or(operation.process_ms)
            .or(per_kind.process_ms)
            .or(self.process_ms)
            .map(Duration::from_millis);

        match configured {
            Some(process) if process > script => ResolvedTimeouts {
                script,
                process,
                adjusted: false,
            },
            Some(_) => ResolvedTimeouts {
                script,
                process: script.saturating_add(MIN_PROCESS_TIMEOUT_GAP),
                adjusted: true,
            },
            None => ResolvedTimeouts {
                script,
                process: script.saturating_add(PROCESS_TIMEOUT_MARGIN),
                adjusted: false,
            },
        }
    }
}

/// Parameter size limits, checked before any process runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum UTF-8 length of an ordinary string parameter.
    pub max_string_bytes: usize,
    /// Maximum number of elements in an array parameter.
    pub max_array_len: usize,
    /// Maximum UTF-8 length of a parameter hinted as code.
    pub max_code_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_string_bytes: 10_000,
            max_array_len: 1_000,
            max_code_bytes: 100_000,
        }
    }
}

/// Retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// Pause between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay_ms: 0,
        }
    }
}

/// Pipeline step toggles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run input validation for operations that declare an input schema.
    pub validate_input: bool,
    /// Run output validation for operations that declare an output schema.
    pub validate_output: bool,
    /// Default for rows normalization; operations may override.
    pub normalize_rows: bool,
    /// Launch the target and pause briefly before running the body.
    pub wake_target: bool,
    /// Pause after launching the target, in milliseconds.
    pub wake_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            validate_input: true,
            validate_output: true,
            normalize_rows: true,
            wake_target: false,
            wake_delay_ms: 500,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Glob patterns of operation names whose full script text is logged.
    pub debug_patterns: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug_patterns: Vec::new(),
        }
    }
}
