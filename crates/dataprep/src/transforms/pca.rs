//! Principal component analysis

use ndarray::{Array1, Array2, Axis};
use serde_json::json;

use super::{numeric_values, select_columns, stats, MethodInfo, StepOutput, StepParams, Transform};
use crate::error::{Error, Result};
use crate::types::{Column, ColumnKind, Table};

const DEFAULT_COMPONENTS: usize = 2;
const MAX_SWEEPS: usize = 64;

/// Replace numeric columns with their first principal components.
///
/// Missing cells are filled with the column mean before fitting. Components
/// are appended as `PCA_1..PCA_k`, ordered by explained variance, with the
/// sign chosen so each component's largest loading is positive. The fit uses
/// a cyclic Jacobi eigen-decomposition of the sample covariance matrix, so
/// the same input always yields the same components.
pub struct Pca;

impl Transform for Pca {
    fn method_id(&self) -> &'static str {
        "pca"
    }

    fn describe(&self) -> MethodInfo {
        MethodInfo::new(
            self.method_id(),
            "Dimensionality reduction (PCA)",
            "Reduce the number of features while keeping most of the variance",
            vec![ColumnKind::Numeric],
        )
        .param(
            "n_components",
            json!({"type": "number", "default": DEFAULT_COMPONENTS, "description": "Number of components"}),
        )
        .columns_param()
    }

    fn validate(&self, params: &StepParams<'_>) -> Result<()> {
        params.integer("n_components", DEFAULT_COMPONENTS, 1)?;
        params.string_list("columns")?;
        Ok(())
    }

    fn apply(&self, mut table: Table, params: &StepParams<'_>) -> Result<StepOutput> {
        let n_components = params.integer("n_components", DEFAULT_COMPONENTS, 1)?;
        let columns = select_columns(&table, params, ColumnKind::Numeric)?;

        if columns.len() < 2 {
            return Ok(StepOutput::new(table).with_warnings(vec![format!(
                "PCA needs at least 2 numeric columns, found {}",
                columns.len()
            )]));
        }
        let rows = table.row_count();
        if rows < 2 {
            return Err(Error::validation(format!("PCA needs at least 2 rows, found {}", rows)));
        }

        // Mean-imputed, centered data matrix
        let mut data = Array2::<f64>::zeros((rows, columns.len()));
        for (j, name) in columns.iter().enumerate() {
            let values = numeric_values(&table, name)?;
            let mean = stats::mean(values)
                .ok_or_else(|| Error::validation(format!("Column '{}' has no values", name)))?;
            for (i, value) in values.iter().enumerate() {
                data[[i, j]] = value.filter(|x| !x.is_nan()).unwrap_or(mean) - mean;
            }
        }

        let covariance = data.t().dot(&data) / (rows - 1) as f64;
        let (eigenvalues, eigenvectors) = symmetric_eigen(&covariance);

        let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
        order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]).then(a.cmp(&b)));
        let k = n_components.min(columns.len());

        let mut components = Array2::<f64>::zeros((columns.len(), k));
        for (out, &src) in order.iter().take(k).enumerate() {
            let mut vector = eigenvectors.column(src).to_owned();
            if dominant_sign(&vector) < 0.0 {
                vector.mapv_inplace(|x| -x);
            }
            components.column_mut(out).assign(&vector);
        }

        let scores = data.dot(&components);
        let total_variance: f64 = eigenvalues.iter().map(|v| v.max(0.0)).sum();
        let explained: Vec<f64> = order.iter().take(k).map(|&i| eigenvalues[i].max(0.0)).collect();
        let ratio: Vec<f64> = explained
            .iter()
            .map(|v| if total_variance > 0.0 { v / total_variance } else { 0.0 })
            .collect();

        for name in &columns {
            table.remove_column(name);
        }
        for (j, component_scores) in scores.axis_iter(Axis(1)).enumerate() {
            let name = format!("PCA_{}", j + 1);
            if table.has_column(&name) {
                return Err(Error::validation(format!("Column '{}' already exists", name)));
            }
            table.set_column(Column::numeric(name, component_scores.iter().map(|v| Some(*v)).collect()))?;
        }

        let loadings: Vec<Vec<f64>> = components
            .axis_iter(Axis(1))
            .map(|c| c.to_vec())
            .collect();

        Ok(StepOutput::new(table).with_derived(json!({
            "columns": columns,
            "n_components": k,
            "explained_variance": explained,
            "explained_variance_ratio": ratio,
            "components": loadings,
        })))
    }
}

/// Sign of the entry with the largest magnitude; first wins on ties
fn dominant_sign(vector: &Array1<f64>) -> f64 {
    let mut best = 0.0f64;
    for &x in vector.iter() {
        if x.abs() > best.abs() {
            best = x;
        }
    }
    if best < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Eigenvalues and eigenvectors (as columns) of a symmetric matrix
fn symmetric_eigen(matrix: &Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = matrix.nrows();
    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);
    let scale: f64 = a.iter().map(|x| x * x).sum::<f64>().max(f64::MIN_POSITIVE);

    for _ in 0..MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[[p, q]] * a[[p, q]];
            }
        }
        if off <= scale * 1e-30 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq == 0.0 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let (akp, akq) = (a[[k, p]], a[[k, q]]);
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (a[[p, k]], a[[q, k]]);
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let (vkp, vkq) = (v[[k, p]], v[[k, q]]);
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let eigenvalues = (0..n).map(|i| a[[i, i]]).collect();
    (eigenvalues, v)
}
