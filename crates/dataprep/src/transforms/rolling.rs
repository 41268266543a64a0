//! Rolling window statistics

use serde_json::json;

use super::{numeric_values, stats, MethodInfo, StepOutput, StepParams, Transform};
use crate::error::Result;
use crate::types::{Column, ColumnKind, Table};

const STATISTICS: &[&str] = &["mean", "std", "min", "max"];
const DEFAULT_STATISTICS: &[&str] = &["mean", "std"];
const DEFAULT_WINDOW: usize = 3;

/// Add `{column}_rolling_{stat}_{window}` columns.
///
/// A row gets a value only when its trailing window is full and has no
/// missing cells; `std` is the sample standard deviation.
pub struct RollingStatistics;

impl Transform for RollingStatistics {
    fn method_id(&self) -> &'static str {
        "rolling_statistics"
    }

    fn describe(&self) -> MethodInfo {
        MethodInfo::new(
            self.method_id(),
            "Rolling statistics",
            "Compute statistics over a sliding window for time series",
            vec![ColumnKind::Numeric],
        )
        .param("target_column", json!({"type": "select", "description": "Target variable"}))
        .param(
            "window_size",
            json!({"type": "number", "default": DEFAULT_WINDOW, "description": "Window size"}),
        )
        .param(
            "statistics",
            json!({
                "type": "multiselect",
                "options": STATISTICS,
                "default": DEFAULT_STATISTICS,
                "description": "Statistics to compute"
            }),
        )
    }

    fn validate(&self, params: &StepParams<'_>) -> Result<()> {
        params.required_string("target_column")?;
        params.integer("window_size", DEFAULT_WINDOW, 1)?;
        params.choice_list("statistics", STATISTICS, DEFAULT_STATISTICS)?;
        Ok(())
    }

    fn apply(&self, mut table: Table, params: &StepParams<'_>) -> Result<StepOutput> {
        let target = params.required_string("target_column")?;
        let window = params.integer("window_size", DEFAULT_WINDOW, 1)?;
        let statistics = params.choice_list("statistics", STATISTICS, DEFAULT_STATISTICS)?;

        let values = numeric_values(&table, target)?.to_vec();
        let mut created = Vec::new();

        for stat in statistics {
            let rolled = (0..values.len())
                .map(|row| {
                    if row + 1 < window {
                        return None;
                    }
                    let slice = &values[row + 1 - window..=row];
                    if slice.iter().any(|v| v.map_or(true, f64::is_nan)) {
                        return None;
                    }
                    match stat {
                        "mean" => stats::mean(slice),
                        "std" => stats::std_dev(slice, 1),
                        "min" => stats::min(slice),
                        _ => stats::max(slice),
                    }
                })
                .collect();
            let name = format!("{}_rolling_{}_{}", target, stat, window);
            table.set_column(Column::numeric(name.clone(), rolled))?;
            created.push(name);
        }

        Ok(StepOutput::new(table).with_derived(json!({ "window_size": window, "created_columns": created })))
    }
}
