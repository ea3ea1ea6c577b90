use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use super::context::{CallContext, PipelineEnv};
use super::step::PipelineStep;
use crate::error::{Error, Result};
use crate::executor::ProcessOutput;
use crate::protocol::{
    codes, decode_envelope, decode_payload, is_error_envelope, Payload, ProtocolResponse,
};

/// Decodes the interpreter output into a payload and its JSON form.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decode;

#[async_trait]
impl PipelineStep for Decode {
    fn name(&self) -> &'static str {
        "decode"
    }

    fn priority(&self) -> i32 {
        400
    }

    async fn run(&self, ctx: &mut CallContext, _env: &PipelineEnv) -> Result<()> {
        let Some(output) = ctx.process_output.as_ref() else {
            return Err(Error::unclassified(format!(
                "no interpreter output for '{}'",
                ctx.call.operation
            )));
        };

        if !output.success() && output.stdout.trim().is_empty() {
            return Err(interpreter_failure(
                output,
                &ctx.call.target_key,
                &ctx.call.operation,
            ));
        }

        let payload = match decode_envelope(&output.stdout) {
            ProtocolResponse::Success { payload } => decode_payload(ctx.call.kind, &payload)?,
            ProtocolResponse::Failure { code, message } => {
                let (target_key, operation) = (&ctx.call.target_key, &ctx.call.operation);
                return Err(if is_error_envelope(&output.stdout) {
                    Error::from_script(code, &message, target_key, operation)
                } else {
                    Error::from_wire(code, &message, target_key, operation)
                });
            },
        };

        ctx.output = payload_value(&payload);
        ctx.payload = Some(payload);
        Ok(())
    }
}

/// JSON form of a payload.
///
/// Scalars and action codes become strings, rows become arrays of strings
/// and sections become an object keyed by section name. Items of repeated
/// section names are appended to the first occurrence.
pub fn payload_value(payload: &Payload) -> Value {
    match payload {
        Payload::Scalar(text) => Value::String(text.clone()),
        Payload::Action(code) => Value::String(code.as_str().to_string()),
        Payload::Rows(rows) => Value::Array(
            rows.iter()
                .map(|row| Value::Array(row.iter().cloned().map(Value::String).collect()))
                .collect(),
        ),
        Payload::Sections(sections) => {
            let mut out = Map::new();
            for section in sections {
                let items = out
                    .entry(section.name.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = items {
                    items.extend(section.items.iter().cloned().map(Value::String));
                }
            }
            Value::Object(out)
        },
    }
}

/// Classify an interpreter that exited non-zero without printing an
/// envelope, typically a compile error reported on stderr as
/// `... (-2741)`.
fn interpreter_failure(output: &ProcessOutput, target_key: &str, operation: &str) -> Error {
    static CODE: OnceLock<Regex> = OnceLock::new();
    let pattern = CODE.get_or_init(|| Regex::new(r"\((-?\d+)\)\s*$").expect("error code pattern is valid"));

    let stderr = output.stderr.trim();
    let code = pattern
        .captures(stderr)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i32>().ok());

    match code {
        Some(codes::APPLESCRIPT_TIMEOUT) => {
            Error::from_wire(codes::TIMEOUT, stderr, target_key, operation)
        },
        Some(code) => Error::Script {
            code,
            message: stderr.to_string(),
        },
        None if stderr.is_empty() => Error::unclassified(match output.exit_code {
            Some(status) => format!("interpreter exited with status {status}"),
            None => "interpreter was terminated by a signal".to_string(),
        }),
        None => Error::unclassified(stderr),
    }
}
