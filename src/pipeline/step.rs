use async_trait::async_trait;

use super::context::{CallContext, PipelineEnv};
use crate::error::Result;

/// When a step runs relative to retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStage {
    /// Once per call, before the first attempt.
    Once,
    /// On every attempt.
    PerAttempt,
}

/// One stage of call processing.
///
/// Steps run in ascending [`priority`](Self::priority). A step whose
/// [`applies`](Self::applies) returns `false` is skipped for that call.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Step name, used in traces.
    fn name(&self) -> &'static str;

    /// Ordering key; lower runs first.
    fn priority(&self) -> i32;

    /// Whether the step is repeated on retries.
    fn stage(&self) -> StepStage {
        StepStage::PerAttempt
    }

    /// Whether the step runs for this call.
    fn applies(&self, _ctx: &CallContext, _env: &PipelineEnv) -> bool {
        true
    }

    /// Run the step.
    async fn run(&self, ctx: &mut CallContext, env: &PipelineEnv) -> Result<()>;
}
