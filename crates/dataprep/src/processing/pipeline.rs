//! Sequential application of transform steps

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::transforms::{StepParams, TransformRegistry};
use crate::types::{PipelineConfig, Table, TransformStep};

/// What one step did to the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step_index: usize,
    pub method_id: String,
    pub rows_before: usize,
    pub rows_after: usize,
    pub columns_after: usize,
    /// Values computed from the data, e.g. scaling factors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Output table plus one report per step
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub table: Table,
    pub steps: Vec<StepReport>,
}

/// Applies a [`PipelineConfig`] to a table using a transform registry
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    registry: Arc<TransformRegistry>,
}

impl TransformPipeline {
    pub fn new(registry: Arc<TransformRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    /// Run every step in order.
    ///
    /// The whole config is validated before the first step runs. `on_step`
    /// is called with the step index before each step; an error from it
    /// stops the pipeline. Errors raised by a step are wrapped as
    /// [`Error::TransformFailure`] naming the step.
    pub fn run<F>(&self, mut table: Table, config: &PipelineConfig, mut on_step: F) -> Result<PipelineOutput>
    where
        F: FnMut(usize, &TransformStep) -> Result<()>,
    {
        self.registry.validate(config)?;

        let mut steps = Vec::with_capacity(config.len());
        for (index, step) in config.methods.iter().enumerate() {
            on_step(index, step)?;

            let transform = self.registry.get(&step.method_id).ok_or_else(|| {
                Error::validation(format!("Step {}: unknown method '{}'", index, step.method_id))
            })?;

            let rows_before = table.row_count();
            let output = transform
                .apply(table, &StepParams::new(&step.parameters))
                .map_err(|e| match e {
                    Error::Validation(msg) | Error::Internal(msg) => Error::transform(index, &step.method_id, msg),
                    other => Error::transform(index, &step.method_id, other),
                })?;
            if output.table.column_count() == 0 {
                return Err(Error::transform(index, &step.method_id, "step removed every column"));
            }

            for warning in &output.warnings {
                tracing::warn!("Step {} ({}): {}", index, step.method_id, warning);
            }
            tracing::debug!(
                "Step {} ({}) done: {} -> {} rows, {} columns",
                index,
                step.method_id,
                rows_before,
                output.table.row_count(),
                output.table.column_count()
            );

            steps.push(StepReport {
                step_index: index,
                method_id: step.method_id.clone(),
                rows_before,
                rows_after: output.table.row_count(),
                columns_after: output.table.column_count(),
                derived: output.derived,
                warnings: output.warnings,
            });
            table = output.table;
        }

        Ok(PipelineOutput { table, steps })
    }
}
