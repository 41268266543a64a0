//! Outlier row removal by z-score or interquartile range

use serde_json::{json, Map};

use super::{select_columns, stats, MethodInfo, StepOutput, StepParams, Transform};
use crate::error::{Error, Result};
use crate::types::{ColumnKind, Table};

const STRATEGIES: &[&str] = &["zscore", "iqr"];
const DEFAULT_THRESHOLD: f64 = 3.0;

/// Drop rows whose value in a selected column is an outlier.
///
/// Columns are processed in order and each one is measured on the rows left
/// by the previous columns. Missing cells are never outliers.
pub struct Outliers;

impl Outliers {
    fn threshold(params: &StepParams<'_>) -> Result<f64> {
        let threshold = params.number("threshold", DEFAULT_THRESHOLD)?;
        if threshold <= 0.0 {
            return Err(Error::validation(format!("'threshold' must be positive, got {}", threshold)));
        }
        Ok(threshold)
    }
}

impl Transform for Outliers {
    fn method_id(&self) -> &'static str {
        "outliers"
    }

    fn describe(&self) -> MethodInfo {
        MethodInfo::new(
            self.method_id(),
            "Outlier removal",
            "Detect anomalous values and drop their rows",
            vec![ColumnKind::Numeric],
        )
        .param(
            "strategy",
            json!({"type": "select", "options": STRATEGIES, "default": "zscore", "description": "Detection method"}),
        )
        .param(
            "threshold",
            json!({"type": "number", "default": DEFAULT_THRESHOLD, "description": "Z-score limit, or IQR multiplier"}),
        )
        .columns_param()
    }

    fn validate(&self, params: &StepParams<'_>) -> Result<()> {
        params.choice("strategy", STRATEGIES, "zscore")?;
        Self::threshold(params)?;
        params.string_list("columns")?;
        Ok(())
    }

    fn apply(&self, mut table: Table, params: &StepParams<'_>) -> Result<StepOutput> {
        let strategy = params.choice("strategy", STRATEGIES, "zscore")?;
        let threshold = Self::threshold(params)?;
        let columns = select_columns(&table, params, ColumnKind::Numeric)?;

        let rows_before = table.row_count();
        let mut bounds = Map::new();
        let mut warnings = Vec::new();

        for name in &columns {
            let Some(values) = table.column(name).and_then(|c| c.as_numeric()) else {
                warnings.push(format!("Skipped non-numeric column '{}'", name));
                continue;
            };

            let range = match strategy {
                "zscore" => match (stats::mean(values), stats::std_dev(values, 1)) {
                    (Some(mean), Some(std)) if std > 0.0 => {
                        // |x - mean| / std < threshold
                        Some((mean - threshold * std, mean + threshold * std, false))
                    }
                    _ => None,
                },
                _ => match (stats::quantile(values, 0.25), stats::quantile(values, 0.75)) {
                    (Some(q1), Some(q3)) => {
                        let iqr = q3 - q1;
                        Some((q1 - threshold * iqr, q3 + threshold * iqr, true))
                    }
                    _ => None,
                },
            };

            let Some((lower, upper, inclusive)) = range else {
                warnings.push(format!("Column '{}' has no spread, nothing removed", name));
                continue;
            };
            bounds.insert(name.clone(), json!([lower, upper]));

            let keep: Vec<bool> = values
                .iter()
                .map(|v| match v {
                    Some(x) if !x.is_nan() => {
                        if inclusive {
                            *x >= lower && *x <= upper
                        } else {
                            *x > lower && *x < upper
                        }
                    }
                    _ => true,
                })
                .collect();
            table.retain_rows(&keep)?;
        }

        let rows_removed = rows_before - table.row_count();
        Ok(StepOutput::new(table)
            .with_derived(json!({
                "strategy": strategy,
                "threshold": threshold,
                "bounds": bounds,
                "rows_removed": rows_removed,
            }))
            .with_warnings(warnings))
    }
}
