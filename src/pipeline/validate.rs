use async_trait::async_trait;

use super::context::{CallContext, PipelineEnv};
use super::step::{PipelineStep, StepStage};
use crate::error::{Error, Result};

/// Validates the caller's input against the operation's input schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputValidation;

#[async_trait]
impl PipelineStep for InputValidation {
    fn name(&self) -> &'static str {
        "input_validation"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn stage(&self) -> StepStage {
        StepStage::Once
    }

    fn applies(&self, ctx: &CallContext, env: &PipelineEnv) -> bool {
        env.config.pipeline.validate_input
            && ctx.operation.validates_input()
            && ctx.operation.input_schema().is_some()
    }

    async fn run(&self, ctx: &mut CallContext, _env: &PipelineEnv) -> Result<()> {
        let Some(schema) = ctx.operation.input_schema() else {
            return Ok(());
        };
        match schema.validate(&ctx.input) {
            Ok(validated) => {
                ctx.input = validated;
                Ok(())
            },
            Err(issues) => Err(Error::InputValidation {
                operation: ctx.call.operation.clone(),
                issues,
            }),
        }
    }
}

/// Validates the final output against the operation's output schema and
/// replaces it with the schema's result.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputValidation;

#[async_trait]
impl PipelineStep for OutputValidation {
    fn name(&self) -> &'static str {
        "output_validation"
    }

    fn priority(&self) -> i32 {
        700
    }

    fn applies(&self, ctx: &CallContext, env: &PipelineEnv) -> bool {
        env.config.pipeline.validate_output
            && ctx.operation.validates_output()
            && ctx.operation.output_schema().is_some()
    }

    async fn run(&self, ctx: &mut CallContext, _env: &PipelineEnv) -> Result<()> {
        let Some(schema) = ctx.operation.output_schema() else {
            return Ok(());
        };
        match schema.validate(&ctx.output) {
            Ok(validated) => {
                ctx.output = validated;
                Ok(())
            },
            Err(issues) => Err(Error::OutputValidation {
                operation: ctx.call.operation.clone(),
                issues,
            }),
        }
    }
}
