//! Feature scaling

use serde_json::{json, Map};

use super::{numeric_values, select_columns, stats, MethodInfo, StepOutput, StepParams, Transform};
use crate::error::{Error, Result};
use crate::types::{Column, ColumnKind, Table};

const STRATEGIES: &[&str] = &["standard", "minmax"];

/// Rescale numeric columns to zero mean and unit variance, or to `[0, 1]`.
///
/// The fitted parameters are returned as derived output. A column with zero
/// spread cannot be scaled and fails the step.
pub struct Standardization;

impl Transform for Standardization {
    fn method_id(&self) -> &'static str {
        "standardization"
    }

    fn describe(&self) -> MethodInfo {
        MethodInfo::new(
            self.method_id(),
            "Standardization",
            "Bring numeric features to a common scale",
            vec![ColumnKind::Numeric],
        )
        .param(
            "strategy",
            json!({"type": "select", "options": STRATEGIES, "default": "standard", "description": "Scaling method"}),
        )
        .columns_param()
    }

    fn validate(&self, params: &StepParams<'_>) -> Result<()> {
        params.choice("strategy", STRATEGIES, "standard")?;
        params.string_list("columns")?;
        Ok(())
    }

    fn apply(&self, mut table: Table, params: &StepParams<'_>) -> Result<StepOutput> {
        let strategy = params.choice("strategy", STRATEGIES, "standard")?;
        let columns = select_columns(&table, params, ColumnKind::Numeric)?;

        if columns.is_empty() {
            return Ok(StepOutput::new(table).with_warnings(vec!["No numeric columns to scale".to_string()]));
        }

        let mut fitted = Map::new();
        for name in &columns {
            let values = numeric_values(&table, name)?;

            let (offset, scale, fit) = if strategy == "standard" {
                let mean = stats::mean(values);
                let std = stats::std_dev(values, 0);
                match (mean, std) {
                    (Some(mean), Some(std)) if std > 0.0 => (mean, std, json!({"mean": mean, "std": std})),
                    (Some(_), Some(_)) => {
                        return Err(Error::validation(format!(
                            "Column '{}' has zero variance, division by zero",
                            name
                        )))
                    }
                    _ => return Err(Error::validation(format!("Column '{}' has no values", name))),
                }
            } else {
                match (stats::min(values), stats::max(values)) {
                    (Some(min), Some(max)) if max > min => (min, max - min, json!({"min": min, "max": max})),
                    (Some(_), Some(_)) => {
                        return Err(Error::validation(format!(
                            "Column '{}' has zero range, division by zero",
                            name
                        )))
                    }
                    _ => return Err(Error::validation(format!("Column '{}' has no values", name))),
                }
            };

            let scaled = values
                .iter()
                .map(|v| v.filter(|x| !x.is_nan()).map(|x| (x - offset) / scale))
                .collect();
            fitted.insert(name.clone(), fit);
            table.set_column(Column::numeric(name.clone(), scaled))?;
        }

        Ok(StepOutput::new(table).with_derived(json!({ "strategy": strategy, "columns": fitted })))
    }
}
