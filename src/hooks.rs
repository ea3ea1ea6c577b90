//! Execution hooks.
//!
//! Hooks observe calls without influencing them: they fire before the
//! script is submitted, after a successful call and after a failed one.
//! Hook methods return nothing; an implementation that can fail must log
//! and carry on.
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use script_relay::hooks::{ExecutionHooks, FailureEvent};
//!
//! struct AlertOnTimeout;
//!
//! #[async_trait]
//! impl ExecutionHooks for AlertOnTimeout {
//!     async fn on_failure(&self, event: &FailureEvent<'_>) {
//!         if event.error.is_timeout() {
//!             page_someone(event.call.operation.as_str()).await;
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "alert-on-timeout"
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::config::ResolvedTimeouts;
use crate::error::Error;
use crate::protocol::{Payload, PayloadKind};
use crate::script::MarshalledParam;

/// Identity of one pipeline call, shared by all of its events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    /// Unique id of the call.
    pub call_id: Uuid,
    /// Operation name.
    pub operation: String,
    /// Queue key the call runs under.
    pub target_key: String,
    /// Payload kind of the operation.
    pub kind: PayloadKind,
}

/// Fired right before the script is submitted to its queue.
#[derive(Debug)]
pub struct PreExecutionEvent<'a> {
    /// Call identity.
    pub call: &'a CallInfo,
    /// 1 for the first attempt, 2 for the first retry, and so on.
    pub attempt: u32,
    /// Full script text.
    pub script: &'a str,
    /// Effective timeouts.
    pub timeouts: ResolvedTimeouts,
    /// Marshalled parameters.
    pub params: &'a [MarshalledParam],
}

/// Fired when a call succeeds.
#[derive(Debug)]
pub struct SuccessEvent<'a> {
    /// Call identity.
    pub call: &'a CallInfo,
    /// Decoded payload.
    pub payload: &'a Payload,
    /// Final output returned to the caller.
    pub output: &'a Value,
    /// Total call duration, retries included.
    pub duration: Duration,
    /// Attempts made.
    pub attempts: u32,
}

/// Fired when a call fails for good.
#[derive(Debug)]
pub struct FailureEvent<'a> {
    /// Call identity.
    pub call: &'a CallInfo,
    /// Normalized error.
    pub error: &'a Error,
    /// Total call duration, retries included.
    pub duration: Duration,
    /// Attempts made.
    pub attempts: u32,
}

/// Observer of pipeline calls.
#[async_trait]
pub trait ExecutionHooks: Send + Sync + 'static {
    /// Called before each attempt's script is submitted.
    async fn before_execute(&self, _event: &PreExecutionEvent<'_>) {}

    /// Called once when a call succeeds.
    async fn on_success(&self, _event: &SuccessEvent<'_>) {}

    /// Called once when a call fails.
    async fn on_failure(&self, _event: &FailureEvent<'_>) {}

    /// Name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Logs call outcomes through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHooks;

#[async_trait]
impl ExecutionHooks for TracingHooks {
    async fn before_execute(&self, event: &PreExecutionEvent<'_>) {
        tracing::debug!(
            call_id = %event.call.call_id,
            operation = %event.call.operation,
            target = %event.call.target_key,
            attempt = event.attempt,
            params = event.params.len(),
            script_bytes = event.script.len(),
            script_timeout_s = event.timeouts.script.as_secs(),
            process_timeout_ms = event.timeouts.process.as_millis() as u64,
            "submitting script"
        );
    }

    async fn on_success(&self, event: &SuccessEvent<'_>) {
        tracing::info!(
            call_id = %event.call.call_id,
            operation = %event.call.operation,
            target = %event.call.target_key,
            kind = %event.call.kind,
            attempts = event.attempts,
            duration_ms = event.duration.as_millis() as u64,
            "call succeeded"
        );
    }

    async fn on_failure(&self, event: &FailureEvent<'_>) {
        tracing::info!(
            call_id = %event.call.call_id,
            operation = %event.call.operation,
            target = %event.call.target_key,
            kind = %event.call.kind,
            error_kind = %event.error.kind(),
            attempts = event.attempts,
            duration_ms = event.duration.as_millis() as u64,
            error = %event.error,
            "call failed"
        );
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// Fans every event out to several hooks.
#[derive(Default)]
pub struct CompositeHooks {
    hooks: Vec<Arc<dyn ExecutionHooks>>,
}

impl std::fmt::Debug for CompositeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeHooks")
            .field("hooks", &self.hooks.iter().map(|h| h.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl CompositeHooks {
    /// Create a composite.
    pub fn new(hooks: Vec<Arc<dyn ExecutionHooks>>) -> Self {
        Self { hooks }
    }

    /// Add a hook.
    pub fn add(&mut self, hook: Arc<dyn ExecutionHooks>) {
        self.hooks.push(hook);
    }

    /// Number of hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// `true` if there are no hooks.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[async_trait]
impl ExecutionHooks for CompositeHooks {
    async fn before_execute(&self, event: &PreExecutionEvent<'_>) {
        let futures: Vec<_> = self.hooks.iter().map(|h| h.before_execute(event)).collect();
        futures::future::join_all(futures).await;
    }

    async fn on_success(&self, event: &SuccessEvent<'_>) {
        let futures: Vec<_> = self.hooks.iter().map(|h| h.on_success(event)).collect();
        futures::future::join_all(futures).await;
    }

    async fn on_failure(&self, event: &FailureEvent<'_>) {
        let futures: Vec<_> = self.hooks.iter().map(|h| h.on_failure(event)).collect();
        futures::future::join_all(futures).await;
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}
