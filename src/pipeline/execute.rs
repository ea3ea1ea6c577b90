use async_trait::async_trait;

use super::context::{CallContext, PipelineEnv};
use super::step::PipelineStep;
use crate::error::{Error, Result};
use crate::executor::{ProcessFailure, ProcessRequest};
use crate::hooks::PreExecutionEvent;
use crate::queue::TaskMetadata;

/// Submits the assembled script to the target's queue and waits for the
/// interpreter to finish.
#[derive(Debug, Clone, Copy, Default)]
pub struct Execute;

#[async_trait]
impl PipelineStep for Execute {
    fn name(&self) -> &'static str {
        "execute"
    }

    fn priority(&self) -> i32 {
        300
    }

    async fn run(&self, ctx: &mut CallContext, env: &PipelineEnv) -> Result<()> {
        let (Some(script), Some(timeouts)) = (ctx.script.clone(), ctx.timeouts) else {
            return Err(Error::unclassified(format!(
                "no script was built for '{}'",
                ctx.call.operation
            )));
        };

        env.hooks
            .before_execute(&PreExecutionEvent {
                call: &ctx.call,
                attempt: ctx.attempt,
                script: &script,
                timeouts,
                params: &ctx.params,
            })
            .await;

        let request = ProcessRequest::for_script(&env.config.interpreter, script, timeouts.process);
        let executor = env.executor.clone();
        let target_key = ctx.call.target_key.clone();
        let operation = ctx.call.operation.clone();
        let metadata = TaskMetadata::labeled(operation.clone())
            .with_attribute("call_id", ctx.call.call_id.to_string())
            .with_attribute("attempt", ctx.attempt.to_string());

        let handle = env.registry.execute(
            &ctx.call.target_key,
            move || async move {
                executor
                    .run(request)
                    .await
                    .map_err(|failure| match failure {
                        ProcessFailure::TimedOut { timeout } => Error::ControllerTimeout {
                            target_key,
                            operation,
                            timeout,
                        },
                        other => Error::unclassified(other.to_string()),
                    })
            },
            metadata,
        );

        ctx.process_output = Some(handle.await?);
        Ok(())
    }
}
