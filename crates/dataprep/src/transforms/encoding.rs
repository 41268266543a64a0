//! Categorical encoding

use serde_json::{json, Map};
use std::collections::BTreeSet;

use super::{select_columns, MethodInfo, StepOutput, StepParams, Transform};
use crate::error::{Error, Result};
use crate::types::{Column, ColumnKind, Table};

const STRATEGIES: &[&str] = &["onehot", "label"];

/// Turn category labels into numbers.
///
/// `onehot` replaces a column with one 0/1 indicator column per category,
/// named `{column}_{category}` and appended in sorted category order.
/// `label` replaces each label with its index in the sorted category list.
/// Missing cells stay missing under `label` and set no indicator under `onehot`.
pub struct CategoricalEncoding;

impl Transform for CategoricalEncoding {
    fn method_id(&self) -> &'static str {
        "categorical_encoding"
    }

    fn describe(&self) -> MethodInfo {
        MethodInfo::new(
            self.method_id(),
            "Categorical encoding",
            "Convert categorical data to a numeric format",
            vec![ColumnKind::Categorical],
        )
        .param(
            "strategy",
            json!({"type": "select", "options": STRATEGIES, "default": "onehot", "description": "Encoding method"}),
        )
        .columns_param()
    }

    fn validate(&self, params: &StepParams<'_>) -> Result<()> {
        params.choice("strategy", STRATEGIES, "onehot")?;
        params.string_list("columns")?;
        Ok(())
    }

    fn apply(&self, mut table: Table, params: &StepParams<'_>) -> Result<StepOutput> {
        let strategy = params.choice("strategy", STRATEGIES, "onehot")?;
        let columns = select_columns(&table, params, ColumnKind::Categorical)?;
        let mut categories_by_column = Map::new();

        for name in &columns {
            let Some(column) = table.column(name) else {
                continue;
            };
            let labels: Vec<Option<String>> = (0..table.row_count()).map(|row| column.data.cell_string(row)).collect();
            let categories: Vec<String> = labels.iter().flatten().cloned().collect::<BTreeSet<_>>().into_iter().collect();
            categories_by_column.insert(name.clone(), json!(categories));

            if strategy == "label" {
                let codes = labels
                    .iter()
                    .map(|label| {
                        label
                            .as_ref()
                            .and_then(|l| categories.binary_search(l).ok())
                            .map(|code| code as f64)
                    })
                    .collect();
                table.set_column(Column::numeric(name.clone(), codes))?;
                continue;
            }

            table.remove_column(name);
            for category in &categories {
                let indicator_name = format!("{}_{}", name, category);
                if table.has_column(&indicator_name) {
                    return Err(Error::validation(format!(
                        "Encoding '{}' would overwrite existing column '{}'",
                        name, indicator_name
                    )));
                }
                let indicator = labels
                    .iter()
                    .map(|label| Some(if label.as_deref() == Some(category.as_str()) { 1.0 } else { 0.0 }))
                    .collect();
                table.set_column(Column::numeric(indicator_name, indicator))?;
            }
        }

        Ok(StepOutput::new(table).with_derived(json!({ "strategy": strategy, "categories": categories_by_column })))
    }
}
