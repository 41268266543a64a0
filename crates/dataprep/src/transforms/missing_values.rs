//! Missing value imputation and row dropping

use serde_json::{json, Map, Value};

use super::{select_columns, stats, MethodInfo, StepOutput, StepParams, Transform};
use crate::error::Result;
use crate::types::{Column, ColumnData, ColumnKind, Table};

const STRATEGIES: &[&str] = &["mean", "median", "mode", "drop_rows"];

/// Fill missing cells with a column statistic, or drop incomplete rows
pub struct MissingValues;

impl Transform for MissingValues {
    fn method_id(&self) -> &'static str {
        "missing_values"
    }

    fn describe(&self) -> MethodInfo {
        MethodInfo::new(
            self.method_id(),
            "Missing value handling",
            "Fill or drop missing values",
            vec![ColumnKind::Numeric, ColumnKind::Categorical],
        )
        .param(
            "strategy",
            json!({
                "type": "select",
                "options": STRATEGIES,
                "default": "mean",
                "description": "How to handle missing cells"
            }),
        )
        .columns_param()
    }

    fn validate(&self, params: &StepParams<'_>) -> Result<()> {
        params.choice("strategy", STRATEGIES, "mean")?;
        params.string_list("columns")?;
        Ok(())
    }

    fn apply(&self, mut table: Table, params: &StepParams<'_>) -> Result<StepOutput> {
        let strategy = params.choice("strategy", STRATEGIES, "mean")?;
        let columns = select_columns(&table, params, ColumnKind::Numeric)?;

        if strategy == "drop_rows" {
            let keep: Vec<bool> = (0..table.row_count())
                .map(|row| {
                    columns
                        .iter()
                        .filter_map(|name| table.column(name))
                        .all(|c| !c.data.is_missing(row))
                })
                .collect();
            let before = table.row_count();
            table.retain_rows(&keep)?;
            let dropped = before - table.row_count();
            return Ok(StepOutput::new(table).with_derived(json!({ "rows_dropped": dropped })));
        }

        let mut fill_values = Map::new();
        let mut warnings = Vec::new();

        for name in &columns {
            let Some(column) = table.column(name) else {
                continue;
            };
            if column.data.missing_count() == 0 {
                continue;
            }

            let filled = match (&column.data, strategy) {
                (ColumnData::Numeric(values), "mean" | "median" | "mode") => {
                    let fill = match strategy {
                        "mean" => stats::mean(values),
                        "median" => stats::median(values),
                        _ => stats::mode(values),
                    };
                    fill.map(|f| {
                        fill_values.insert(name.clone(), json!(f));
                        let values = values.iter().map(|v| Some(v.filter(|x| !x.is_nan()).unwrap_or(f))).collect();
                        ColumnData::Numeric(values)
                    })
                }
                (ColumnData::Categorical(values), "mode") => stats::mode_str(values).map(|f| {
                    fill_values.insert(name.clone(), Value::String(f.clone()));
                    let values = values.iter().map(|v| Some(v.clone().unwrap_or_else(|| f.clone()))).collect();
                    ColumnData::Categorical(values)
                }),
                (ColumnData::Datetime(values), "mode") => {
                    let mut sorted: Vec<_> = values.iter().flatten().copied().collect();
                    sorted.sort();
                    stats::most_frequent_sorted(&sorted).map(|f| {
                        fill_values.insert(name.clone(), Value::String(crate::types::format_datetime(f)));
                        ColumnData::Datetime(values.iter().map(|v| Some(v.unwrap_or(f))).collect())
                    })
                }
                (data, _) => {
                    warnings.push(format!(
                        "Skipped {} column '{}': strategy '{}' needs numeric values",
                        data.kind(),
                        name,
                        strategy
                    ));
                    continue;
                }
            };

            match filled {
                Some(data) => table.set_column(Column::new(name.clone(), data))?,
                None => warnings.push(format!("Column '{}' has no values to compute a fill from", name)),
            }
        }

        Ok(StepOutput::new(table)
            .with_derived(json!({ "strategy": strategy, "fill_values": fill_values }))
            .with_warnings(warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(table: Table, params: Value) -> StepOutput {
        let raw = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        MissingValues.apply(table, &StepParams::new(&raw)).unwrap()
    }

    #[test]
    fn test_mean_fill() {
        let table = Table::new(vec![Column::numeric("x", vec![Some(1.0), None, Some(3.0)])]).unwrap();
        let out = run(table, json!({"strategy": "mean"}));

        assert_eq!(
            out.table.column("x").unwrap().as_numeric().unwrap(),
            &[Some(1.0), Some(2.0), Some(3.0)]
        );
        assert_eq!(out.derived.unwrap()["fill_values"]["x"], 2.0);
    }

    #[test]
    fn test_median_and_default_columns() {
        let table = Table::new(vec![
            Column::numeric("x", vec![Some(1.0), None, Some(10.0), Some(2.0)]),
            Column::categorical("c", vec![None, Some("a".into()), None, Some("b".into())]),
        ])
        .unwrap();
        let out = run(table, json!({"strategy": "median"}));

        assert_eq!(out.table.column("x").unwrap().as_numeric().unwrap()[1], Some(2.0));
        // Categorical columns are not selected by default
        assert_eq!(out.table.column("c").unwrap().data.missing_count(), 2);
    }

    #[test]
    fn test_mode_on_categorical() {
        let table = Table::new(vec![Column::categorical(
            "c",
            vec![Some("b".into()), None, Some("b".into()), Some("a".into())],
        )])
        .unwrap();
        let out = run(table, json!({"strategy": "mode", "columns": ["c"]}));
        assert_eq!(out.table.column("c").unwrap().data.cell_string(1), Some("b".to_string()));
    }

    #[test]
    fn test_mean_on_categorical_is_skipped_with_warning() {
        let table = Table::new(vec![Column::categorical("c", vec![None, Some("a".into())])]).unwrap();
        let out = run(table, json!({"strategy": "mean", "columns": ["c"]}));
        assert_eq!(out.warnings.len(), 1);
        assert!(out.table.column("c").unwrap().data.is_missing(0));
    }

    #[test]
    fn test_drop_rows() {
        let table = Table::new(vec![
            Column::numeric("x", vec![Some(1.0), None, Some(3.0)]),
            Column::numeric("y", vec![None, Some(2.0), Some(3.0)]),
        ])
        .unwrap();
        let out = run(table, json!({"strategy": "drop_rows", "columns": ["x"]}));

        assert_eq!(out.table.row_count(), 2);
        assert_eq!(out.derived.unwrap()["rows_dropped"], 1);
    }
}
