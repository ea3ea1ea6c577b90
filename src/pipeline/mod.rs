//! The call pipeline.
//!
//! A [`Pipeline`] runs an operation through an ordered list of
//! [`PipelineStep`]s:
//!
//! | priority | step | runs |
//! |---|---|---|
//! | 100 | [`InputValidation`] | once |
//! | 200 | [`ScriptBuild`] | every attempt |
//! | 300 | [`Execute`] | every attempt |
//! | 400 | [`Decode`] | every attempt |
//! | 500 | [`RowsMapping`] | every attempt, rows only |
//! | 600 | [`RowsNormalization`] | every attempt, rows only |
//! | 700 | [`OutputValidation`] | every attempt |
//!
//! Failures from any step, including panics, are converted once into a
//! [`RunError`]. Retriable failures re-run the per-attempt steps according
//! to the pipeline's [`RetryPolicy`].
//!
//! ```no_run
//! use script_relay::{EngineConfig, OperationDef, Pipeline, PayloadKind, RunOptions};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), script_relay::RunError> {
//! let pipeline = Pipeline::new(EngineConfig::for_application("Things3"));
//! let rename = OperationDef::builder("rename_project", PayloadKind::Action)
//!     .body("set name of project id ${id} to ${name}\nreturn \"done\"")
//!     .build()
//!     .expect("valid operation");
//!
//! let code = pipeline
//!     .run(&rename, json!({"id": "p-1", "name": "Groceries"}), RunOptions::new())
//!     .await?;
//! assert_eq!(code, "done");
//! # Ok(())
//! # }
//! ```

mod build;
mod context;
mod decode;
mod execute;
mod rows;
mod step;
mod validate;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Error, Result, RunError, SchemaIssue};
use crate::executor::{ProcessExecutor, ProcessOutput, TokioProcessExecutor};
use crate::hooks::{CallInfo, ExecutionHooks, FailureEvent, SuccessEvent, TracingHooks};
use crate::logging::DebugFilter;
use crate::operation::OperationDef;
use crate::queue::QueueRegistry;
use crate::retry::RetryPolicy;
use crate::stats::{CallSample, StatsCollector};

pub use build::ScriptBuild;
pub use context::{CallContext, PipelineEnv, RunOptions};
pub use decode::{payload_value, Decode};
pub use execute::Execute;
pub use rows::{RowsMapping, RowsNormalization};
pub use step::{PipelineStep, StepStage};
pub use validate::{InputValidation, OutputValidation};

/// Result of a pipeline call.
pub type RunResult<T> = std::result::Result<T, RunError>;

/// The steps every pipeline starts with.
pub fn default_steps() -> Vec<Arc<dyn PipelineStep>> {
    vec![
        Arc::new(InputValidation),
        Arc::new(ScriptBuild),
        Arc::new(Execute),
        Arc::new(Decode),
        Arc::new(RowsMapping),
        Arc::new(RowsNormalization),
        Arc::new(OutputValidation),
    ]
}

/// Runs operations against their targets.
///
/// Cheap to share behind an `Arc`; every call is independent apart from
/// the per-key queues and the stats collector.
pub struct Pipeline {
    env: PipelineEnv,
    steps: Vec<Arc<dyn PipelineStep>>,
    retry: RetryPolicy,
    stats: Arc<StatsCollector>,
}

impl Pipeline {
    /// Pipeline with the default steps, executor and hooks.
    pub fn new(config: EngineConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start configuring a pipeline.
    pub fn builder(config: EngineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.env.config
    }

    /// Per-key queues used by [`Execute`].
    pub fn registry(&self) -> &Arc<QueueRegistry<ProcessOutput>> {
        &self.env.registry
    }

    /// Call statistics.
    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    /// Retry policy applied to every call.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Queue key a call would run under: the per-call override, then the
    /// operation's key, then the configured application.
    pub fn target_key_for(&self, operation: &OperationDef, options: &RunOptions) -> String {
        options
            .target_key
            .clone()
            .or_else(|| operation.target_key().map(str::to_string))
            .unwrap_or_else(|| self.env.config.application.clone())
    }

    /// Run `operation` with `input`.
    ///
    /// Never panics and never returns an unconverted error: every failure
    /// arrives as a [`RunError`].
    pub async fn run(
        &self,
        operation: &Arc<OperationDef>,
        input: Value,
        options: RunOptions,
    ) -> RunResult<Value> {
        let call = CallInfo {
            call_id: Uuid::new_v4(),
            operation: operation.name().to_string(),
            target_key: self.target_key_for(operation, &options),
            kind: operation.kind(),
        };
        let span = tracing::info_span!(
            "script_call",
            call_id = %call.call_id,
            operation = %call.operation,
            target = %call.target_key,
            kind = %call.kind,
        );
        let ctx = CallContext::new(call, operation.clone(), input, options);
        self.run_call(ctx).instrument(span).await
    }

    /// Run `operation` and deserialize its output into `T`.
    ///
    /// A successful call whose output does not fit `T` fails with
    /// [`Error::OutputValidation`].
    pub async fn run_typed<T: DeserializeOwned>(
        &self,
        operation: &Arc<OperationDef>,
        input: Value,
        options: RunOptions,
    ) -> RunResult<T> {
        let target_key = self.target_key_for(operation, &options);
        let value = self.run(operation, input, options).await?;
        serde_json::from_value(value).map_err(|e| {
            RunError::new(
                Error::OutputValidation {
                    operation: operation.name().to_string(),
                    issues: vec![SchemaIssue::new("", e.to_string())],
                },
                operation.name(),
                target_key,
                operation.kind(),
            )
        })
    }

    async fn run_call(&self, mut ctx: CallContext) -> RunResult<Value> {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.drive(&mut ctx)).catch_unwind().await;
        let result = outcome.unwrap_or_else(|panic| {
            Err(Error::unclassified(format!(
                "pipeline panicked: {}",
                panic_message(panic.as_ref())
            )))
        });
        let duration = started.elapsed();
        let attempts = ctx.attempt.max(1);
        let call = &ctx.call;

        match result {
            Ok(()) => {
                self.stats
                    .record(&CallSample::success(&call.operation, duration, attempts));
                if let Some(payload) = ctx.payload.as_ref() {
                    let event = SuccessEvent {
                        call,
                        payload,
                        output: &ctx.output,
                        duration,
                        attempts,
                    };
                    observe("on_success", self.env.hooks.on_success(&event)).await;
                }
                Ok(ctx.output)
            },
            Err(error) => {
                self.stats.record(&CallSample::failure(
                    &call.operation,
                    duration,
                    attempts,
                    error.kind(),
                ));
                let event = FailureEvent {
                    call,
                    error: &error,
                    duration,
                    attempts,
                };
                observe("on_failure", self.env.hooks.on_failure(&event)).await;
                Err(RunError::new(
                    error,
                    call.operation.clone(),
                    call.target_key.clone(),
                    call.kind,
                ))
            },
        }
    }

    async fn drive(&self, ctx: &mut CallContext) -> Result<()> {
        for step in self.stage(StepStage::Once) {
            self.run_step(step.as_ref(), ctx).await?;
        }

        let policy = match ctx.options.max_retries {
            Some(max_retries) => self.retry.clone().with_max_retries(max_retries),
            None => self.retry.clone(),
        };

        loop {
            ctx.begin_attempt();
            let error = match self.run_attempt(ctx).await {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };

            let retries_done = ctx.attempt - 1;
            if !policy.should_retry(&error, retries_done) {
                return Err(error);
            }
            warn!(
                attempt = ctx.attempt,
                max_retries = policy.max_retries(),
                error_kind = %error.kind(),
                error = %error,
                "attempt failed, retrying"
            );
            if !policy.delay().is_zero() {
                tokio::time::sleep(policy.delay()).await;
            }
        }
    }

    async fn run_attempt(&self, ctx: &mut CallContext) -> Result<()> {
        for step in self.stage(StepStage::PerAttempt) {
            self.run_step(step.as_ref(), ctx).await?;
        }
        Ok(())
    }

    async fn run_step(&self, step: &dyn PipelineStep, ctx: &mut CallContext) -> Result<()> {
        if !step.applies(ctx, &self.env) {
            debug!(step = step.name(), "step skipped");
            return Ok(());
        }
        debug!(step = step.name(), attempt = ctx.attempt, "running step");
        step.run(ctx, &self.env).await
    }

    fn stage(&self, stage: StepStage) -> impl Iterator<Item = &Arc<dyn PipelineStep>> {
        self.steps.iter().filter(move |step| step.stage() == stage)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("env", &self.env)
            .field("steps", &self.step_names())
            .field("retry", &self.retry)
            .finish()
    }
}

/// Await an outcome hook; a panicking observer is logged, never propagated.
async fn observe(hook: &'static str, notify: impl std::future::Future<Output = ()>) {
    if let Err(panic) = AssertUnwindSafe(notify).catch_unwind().await {
        warn!(hook, panic = %panic_message(panic.as_ref()), "execution hook panicked");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: EngineConfig,
    executor: Option<Arc<dyn ProcessExecutor>>,
    hooks: Option<Arc<dyn ExecutionHooks>>,
    retry: Option<RetryPolicy>,
    stats: Option<Arc<StatsCollector>>,
    registry: Option<Arc<QueueRegistry<ProcessOutput>>>,
    steps: Vec<Arc<dyn PipelineStep>>,
}

impl PipelineBuilder {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            executor: None,
            hooks: None,
            retry: None,
            stats: None,
            registry: None,
            steps: default_steps(),
        }
    }

    /// Process executor; defaults to [`TokioProcessExecutor`].
    pub fn executor(self, executor: impl ProcessExecutor + 'static) -> Self {
        self.executor_ref(Arc::new(executor))
    }

    /// Shared process executor.
    pub fn executor_ref(mut self, executor: Arc<dyn ProcessExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Call observers; defaults to [`TracingHooks`].
    pub fn hooks(self, hooks: impl ExecutionHooks) -> Self {
        self.hooks_ref(Arc::new(hooks))
    }

    /// Shared call observers.
    pub fn hooks_ref(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Retry policy; defaults to the `retry` configuration section.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Share a stats collector with other pipelines.
    pub fn stats(mut self, stats: Arc<StatsCollector>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Share queues with other pipelines so their calls to the same target
    /// are serialized together.
    pub fn registry(mut self, registry: Arc<QueueRegistry<ProcessOutput>>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Add a step; it is ordered among the others by its priority.
    pub fn step(mut self, step: impl PipelineStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Finish the pipeline.
    pub fn build(self) -> Pipeline {
        let mut steps = self.steps;
        steps.sort_by_key(|step| step.priority());

        let retry = self
            .retry
            .unwrap_or_else(|| RetryPolicy::from_config(&self.config.retry));
        let debug = DebugFilter::from_config(&self.config.logging);

        Pipeline {
            env: PipelineEnv {
                config: Arc::new(self.config),
                registry: self.registry.unwrap_or_default(),
                executor: self
                    .executor
                    .unwrap_or_else(|| Arc::new(TokioProcessExecutor::new())),
                hooks: self.hooks.unwrap_or_else(|| Arc::new(TracingHooks)),
                debug,
            },
            steps,
            retry,
            stats: self.stats.unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("application", &self.config.application)
            .field("steps", &self.steps.len())
            .finish()
    }
}
