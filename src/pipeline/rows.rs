use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::context::{CallContext, PipelineEnv};
use super::step::PipelineStep;
use crate::error::Result;
use crate::operation::RowMapping;
use crate::protocol::{Payload, PayloadKind};
use crate::schema::normalize::normalize;

/// Turns decoded rows into records.
///
/// The first available source wins: the operation's row function, its
/// column list, then the field names of an `Array(Object)` output schema.
/// Without any of them rows stay arrays of strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowsMapping;

#[async_trait]
impl PipelineStep for RowsMapping {
    fn name(&self) -> &'static str {
        "rows_mapping"
    }

    fn priority(&self) -> i32 {
        500
    }

    fn applies(&self, ctx: &CallContext, _env: &PipelineEnv) -> bool {
        ctx.call.kind == PayloadKind::Rows
    }

    async fn run(&self, ctx: &mut CallContext, _env: &PipelineEnv) -> Result<()> {
        let Some(Payload::Rows(rows)) = ctx.payload.as_ref() else {
            return Ok(());
        };

        let mapped: Vec<Value> = match ctx.operation.row_mapping() {
            Some(RowMapping::Custom(map)) => rows.iter().map(|row| map(row.as_slice())).collect(),
            Some(RowMapping::Columns(columns)) => {
                rows.iter().map(|row| map_columns(row, columns)).collect()
            },
            None => {
                let inferred = ctx
                    .operation
                    .output_schema()
                    .and_then(|schema| schema.describe())
                    .and_then(|descriptor| descriptor.row_fields());
                match inferred {
                    Some(columns) => {
                        debug!(
                            operation = %ctx.call.operation,
                            columns = ?columns,
                            "row fields inferred from output schema"
                        );
                        rows.iter().map(|row| map_columns(row, &columns)).collect()
                    },
                    None => return Ok(()),
                }
            },
        };
        ctx.output = Value::Array(mapped);
        Ok(())
    }
}

/// Pair fields with column names by position. Extra fields are dropped and
/// missing ones are left out of the record.
fn map_columns(row: &[String], columns: &[String]) -> Value {
    let record: Map<String, Value> = columns
        .iter()
        .zip(row)
        .map(|(column, field)| (column.clone(), Value::String(field.clone())))
        .collect();
    Value::Object(record)
}

/// Coerces row fields to the types the output schema describes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowsNormalization;

#[async_trait]
impl PipelineStep for RowsNormalization {
    fn name(&self) -> &'static str {
        "rows_normalization"
    }

    fn priority(&self) -> i32 {
        600
    }

    fn applies(&self, ctx: &CallContext, env: &PipelineEnv) -> bool {
        ctx.call.kind == PayloadKind::Rows
            && ctx
                .operation
                .normalize_rows()
                .unwrap_or(env.config.pipeline.normalize_rows)
            && ctx.operation.output_schema().is_some()
    }

    async fn run(&self, ctx: &mut CallContext, _env: &PipelineEnv) -> Result<()> {
        let Some(descriptor) = ctx
            .operation
            .output_schema()
            .and_then(|schema| schema.describe())
        else {
            return Ok(());
        };
        let output = std::mem::take(&mut ctx.output);
        ctx.output = normalize(output, &descriptor);
        Ok(())
    }
}
