use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::context::{CallContext, PipelineEnv};
use super::step::PipelineStep;
use crate::error::Result;
use crate::script::{assemble, marshal_params, AssembleRequest};

/// Marshals parameters, resolves timeouts and assembles the script.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptBuild;

#[async_trait]
impl PipelineStep for ScriptBuild {
    fn name(&self) -> &'static str {
        "script_build"
    }

    fn priority(&self) -> i32 {
        200
    }

    async fn run(&self, ctx: &mut CallContext, env: &PipelineEnv) -> Result<()> {
        let op = ctx.operation.clone();
        let config = &env.config;

        let mut limits = config.limits;
        if let Some(max_code_bytes) = ctx.options.max_code_bytes {
            limits.max_code_bytes = max_code_bytes;
        }
        ctx.params = marshal_params(&ctx.input, op.param_hints(), &limits)?;

        let timeouts = config
            .timeouts
            .resolve(op.kind(), op.timeouts(), ctx.options.timeouts);
        if timeouts.adjusted {
            warn!(
                operation = %op.name(),
                script_timeout_s = timeouts.script.as_secs(),
                process_timeout_ms = timeouts.process.as_millis() as u64,
                "process timeout did not exceed script timeout, raised"
            );
        }

        let wake = ctx
            .options
            .wake_target
            .unwrap_or(config.pipeline.wake_target);
        let body = op.render_body(&ctx.input);
        let script = assemble(&AssembleRequest {
            target: &config.application,
            kind: op.kind(),
            body: &body,
            params: &ctx.params,
            script_timeout: timeouts.script,
            wake_delay: wake.then(|| Duration::from_millis(config.pipeline.wake_delay_ms)),
        });

        if env.debug.matches(op.name()) {
            info!(
                call_id = %ctx.call.call_id,
                operation = %op.name(),
                attempt = ctx.attempt,
                "assembled script:\n{script}"
            );
        }

        ctx.timeouts = Some(timeouts);
        ctx.script = Some(script);
        Ok(())
    }
}
