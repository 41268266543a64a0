//! Dataset analysis and method recommendations

use chrono::Utc;

use crate::transforms::stats;
use crate::types::{ColumnData, ColumnInfo, ColumnKind, DatasetAnalysis, Table};

/// Rows a datetime column needs before it counts as a time series
const TIME_SERIES_MIN_ROWS: usize = 10;

/// Numeric columns above which PCA is recommended
const PCA_MIN_NUMERIC_COLUMNS: usize = 5;

/// Summarize a table and suggest preprocessing methods
pub fn analyze_dataset(dataset_id: &str, filename: &str, table: &Table) -> DatasetAnalysis {
    let columns: Vec<ColumnInfo> = table
        .columns()
        .iter()
        .map(|column| {
            let numeric = column.as_numeric();
            ColumnInfo {
                name: column.name.clone(),
                kind: column.kind(),
                missing_count: column.data.missing_count(),
                unique_count: column.data.unique_count(),
                is_time_series: table.row_count() > TIME_SERIES_MIN_ROWS && is_sorted_series(&column.data),
                min_value: numeric.and_then(stats::min),
                max_value: numeric.and_then(stats::max),
                mean_value: numeric.and_then(stats::mean),
            }
        })
        .collect();

    let recommended_methods = recommend(&columns);

    DatasetAnalysis {
        dataset_id: dataset_id.to_string(),
        filename: filename.to_string(),
        row_count: table.row_count(),
        column_count: table.column_count(),
        columns,
        recommended_methods,
        uploaded_at: Utc::now(),
    }
}

/// Datetime column sorted ascending or descending
fn is_sorted_series(data: &ColumnData) -> bool {
    let ColumnData::Datetime(values) = data else {
        return false;
    };
    let present: Vec<_> = values.iter().flatten().collect();
    present.windows(2).all(|w| w[0] <= w[1]) || present.windows(2).all(|w| w[0] >= w[1])
}

fn recommend(columns: &[ColumnInfo]) -> Vec<String> {
    let count_of = |kind: ColumnKind| columns.iter().filter(|c| c.kind == kind).count();
    let numeric = count_of(ColumnKind::Numeric);

    let mut methods = Vec::new();
    if columns.iter().any(|c| c.missing_count > 0) {
        methods.push("missing_values");
    }
    if numeric > 0 {
        methods.push("outliers");
        methods.push("standardization");
        if numeric > PCA_MIN_NUMERIC_COLUMNS {
            methods.push("pca");
        }
    }
    if count_of(ColumnKind::Categorical) > 0 {
        methods.push("categorical_encoding");
    }
    if columns.iter().any(|c| c.is_time_series) {
        methods.push("lagging");
        methods.push("rolling_statistics");
    }
    methods.into_iter().map(String::from).collect()
}
