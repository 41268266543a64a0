//! Lagged copies of time-series columns

use serde_json::json;

use super::{MethodInfo, StepOutput, StepParams, Transform};
use crate::error::{Error, Result};
use crate::types::{Column, ColumnData, ColumnKind, Table};

const DEFAULT_LAGS: &[usize] = &[1, 2, 3];

/// Add `{column}_lag_{k}` columns holding the value from `k` rows earlier.
/// The first `k` rows of each lag column are missing.
pub struct Lagging;

impl Transform for Lagging {
    fn method_id(&self) -> &'static str {
        "lagging"
    }

    fn describe(&self) -> MethodInfo {
        MethodInfo::new(
            self.method_id(),
            "Lag features",
            "Create lagged copies of variables for time series",
            vec![ColumnKind::Numeric],
        )
        .param("target_column", json!({"type": "select", "description": "Target variable"}))
        .param(
            "lag_periods",
            json!({
                "type": "multiselect",
                "options": [1, 2, 3, 4, 5, 6, 7, 14, 30],
                "default": DEFAULT_LAGS,
                "description": "Lag periods"
            }),
        )
        .param(
            "exog_columns",
            json!({"type": "multiselect", "description": "Exogenous variables to lag as well"}),
        )
    }

    fn validate(&self, params: &StepParams<'_>) -> Result<()> {
        params.required_string("target_column")?;
        params.integer_list("lag_periods", DEFAULT_LAGS, 1)?;
        params.string_list("exog_columns")?;
        Ok(())
    }

    fn apply(&self, mut table: Table, params: &StepParams<'_>) -> Result<StepOutput> {
        let target = params.required_string("target_column")?;
        let lags = params.integer_list("lag_periods", DEFAULT_LAGS, 1)?;
        let exog = params.string_list("exog_columns")?.unwrap_or_default();

        let mut sources = vec![target.to_string()];
        sources.extend(exog.into_iter().filter(|c| c != target));

        let mut created = Vec::new();
        for source in &sources {
            let data = table
                .column(source)
                .map(|c| c.data.clone())
                .ok_or_else(|| Error::validation(format!("Column '{}' not found", source)))?;
            for &lag in &lags {
                let name = format!("{}_lag_{}", source, lag);
                table.set_column(Column::new(name.clone(), shift(&data, lag)))?;
                created.push(name);
            }
        }

        Ok(StepOutput::new(table).with_derived(json!({ "lag_periods": lags, "created_columns": created })))
    }
}

/// Move values `lag` rows down, filling the head with missing cells
pub(crate) fn shift(data: &ColumnData, lag: usize) -> ColumnData {
    fn shifted<T: Clone>(values: &[Option<T>], lag: usize) -> Vec<Option<T>> {
        let lag = lag.min(values.len());
        std::iter::repeat(None)
            .take(lag)
            .chain(values[..values.len() - lag].iter().cloned())
            .collect()
    }
    match data {
        ColumnData::Numeric(v) => ColumnData::Numeric(shifted(v, lag)),
        ColumnData::Categorical(v) => ColumnData::Categorical(shifted(v, lag)),
        ColumnData::Datetime(v) => ColumnData::Datetime(shifted(v, lag)),
    }
}
