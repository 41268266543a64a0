//! Table transforms and the registry that resolves them by method id

mod encoding;
mod lagging;
mod missing_values;
mod outliers;
mod pca;
mod registry;
mod rolling;
mod scaling;
pub mod stats;

pub use encoding::CategoricalEncoding;
pub use lagging::Lagging;
pub use missing_values::MissingValues;
pub use outliers::Outliers;
pub use pca::Pca;
pub use registry::TransformRegistry;
pub use rolling::RollingStatistics;
pub use scaling::Standardization;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::types::{ColumnKind, Table};

/// A named, parameterized table transform.
///
/// Transforms are pure: the same table and parameters always produce the
/// same output. Parameter errors are reported by `validate` before any job
/// is scheduled; data-dependent errors (zero spread, too few rows) come from
/// `apply` and fail the pipeline step.
pub trait Transform: Send + Sync {
    /// Registry key, e.g. `missing_values`
    fn method_id(&self) -> &'static str;

    /// Catalogue entry shown by the methods endpoint
    fn describe(&self) -> MethodInfo;

    /// Check parameters without touching data
    fn validate(&self, params: &StepParams<'_>) -> Result<()>;

    /// Apply to a table
    fn apply(&self, table: Table, params: &StepParams<'_>) -> Result<StepOutput>;
}

/// Result of one transform application
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub table: Table,
    /// Values computed from the data, e.g. scaling factors
    pub derived: Option<Value>,
    /// Non-fatal notes, e.g. skipped columns
    pub warnings: Vec<String>,
}

impl StepOutput {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            derived: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_derived(mut self, derived: Value) -> Self {
        self.derived = Some(derived);
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Catalogue entry for a transform
#[derive(Debug, Clone, Serialize)]
pub struct MethodInfo {
    pub method_id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub applicable_types: Vec<ColumnKind>,
    /// Parameter name -> descriptor (`type`, `options`, `default`, `description`)
    pub parameters: Map<String, Value>,
}

impl MethodInfo {
    pub fn new(
        method_id: &'static str,
        name: &'static str,
        description: &'static str,
        applicable_types: Vec<ColumnKind>,
    ) -> Self {
        Self {
            method_id,
            name,
            description,
            applicable_types,
            parameters: Map::new(),
        }
    }

    pub fn param(mut self, name: &str, descriptor: Value) -> Self {
        self.parameters.insert(name.to_string(), descriptor);
        self
    }

    /// Common `columns` multiselect parameter
    pub fn columns_param(self) -> Self {
        self.param(
            "columns",
            json!({"type": "multiselect", "description": "Columns to process (default: all applicable)"}),
        )
    }
}

/// Typed, read-only view over a step's JSON parameters
#[derive(Debug, Clone, Copy)]
pub struct StepParams<'a> {
    raw: &'a Map<String, Value>,
}

impl<'a> StepParams<'a> {
    pub fn new(raw: &'a Map<String, Value>) -> Self {
        Self { raw }
    }

    fn present(&self, name: &str) -> Option<&'a Value> {
        self.raw.get(name).filter(|v| !v.is_null())
    }

    /// String parameter restricted to `options`
    pub fn choice(&self, name: &str, options: &[&'static str], default: &'static str) -> Result<&'static str> {
        match self.present(name) {
            None => Ok(default),
            Some(Value::String(s)) => options
                .iter()
                .copied()
                .find(|o| *o == s.as_str())
                .ok_or_else(|| {
                    Error::validation(format!(
                        "'{}' must be one of [{}], got '{}'",
                        name,
                        options.join(", "),
                        s
                    ))
                }),
            Some(other) => Err(Error::validation(format!(
                "'{}' must be a string, got {}",
                name, other
            ))),
        }
    }

    pub fn number(&self, name: &str, default: f64) -> Result<f64> {
        match self.present(name) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| Error::validation(format!("'{}' must be a number, got {}", name, value))),
        }
    }

    /// Integer parameter that must be at least `min`
    pub fn integer(&self, name: &str, default: usize, min: usize) -> Result<usize> {
        let value = match self.present(name) {
            None => default,
            Some(value) => as_usize(value)
                .ok_or_else(|| Error::validation(format!("'{}' must be a non-negative integer, got {}", name, value)))?,
        };
        if value < min {
            return Err(Error::validation(format!("'{}' must be at least {}, got {}", name, min, value)));
        }
        Ok(value)
    }

    pub fn optional_string(&self, name: &str) -> Result<Option<&'a str>> {
        match self.present(name) {
            None => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(Error::validation(format!("'{}' must be a string, got {}", name, other))),
        }
    }

    pub fn required_string(&self, name: &str) -> Result<&'a str> {
        self.optional_string(name)?
            .ok_or_else(|| Error::validation(format!("'{}' is required", name)))
    }

    /// List of strings; absent or empty means "not given"
    pub fn string_list(&self, name: &str) -> Result<Option<Vec<String>>> {
        let items = match self.present(name) {
            None => return Ok(None),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(Error::validation(format!("'{}' must be a list, got {}", name, other)))
            }
        };
        let list = items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::validation(format!("'{}' entries must be strings, got {}", name, item)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((!list.is_empty()).then_some(list))
    }

    /// List of integers, each at least `min`
    pub fn integer_list(&self, name: &str, default: &[usize], min: usize) -> Result<Vec<usize>> {
        let items = match self.present(name) {
            None => return Ok(default.to_vec()),
            Some(Value::Array(items)) if items.is_empty() => return Ok(default.to_vec()),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(Error::validation(format!("'{}' must be a list, got {}", name, other)))
            }
        };
        items
            .iter()
            .map(|item| match as_usize(item) {
                Some(v) if v >= min => Ok(v),
                _ => Err(Error::validation(format!(
                    "'{}' entries must be integers >= {}, got {}",
                    name, min, item
                ))),
            })
            .collect()
    }

    /// List of strings restricted to `options`
    pub fn choice_list(
        &self,
        name: &str,
        options: &[&'static str],
        default: &[&'static str],
    ) -> Result<Vec<&'static str>> {
        let Some(list) = self.string_list(name)? else {
            return Ok(default.to_vec());
        };
        list.iter()
            .map(|s| {
                options.iter().copied().find(|o| *o == s.as_str()).ok_or_else(|| {
                    Error::validation(format!(
                        "'{}' entries must be one of [{}], got '{}'",
                        name,
                        options.join(", "),
                        s
                    ))
                })
            })
            .collect()
    }
}

fn as_usize(value: &Value) -> Option<usize> {
    if let Some(v) = value.as_u64() {
        return usize::try_from(v).ok();
    }
    // Accept 2.0 as 2
    value
        .as_f64()
        .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u32::MAX as f64)
        .map(|f| f as usize)
}

/// Resolve the `columns` parameter against a table.
///
/// Named columns must exist. Without a list, every column of `default_kind`
/// is selected in table order.
pub fn select_columns(table: &Table, params: &StepParams<'_>, default_kind: ColumnKind) -> Result<Vec<String>> {
    match params.string_list("columns")? {
        Some(names) => {
            for name in &names {
                if !table.has_column(name) {
                    return Err(Error::validation(format!("Column '{}' not found", name)));
                }
            }
            Ok(names)
        }
        None => Ok(table.names_of_kind(default_kind)),
    }
}

/// Numeric values of a column, or an error naming the column
pub(crate) fn numeric_values<'t>(table: &'t Table, name: &str) -> Result<&'t [Option<f64>]> {
    let column = table
        .column(name)
        .ok_or_else(|| Error::validation(format!("Column '{}' not found", name)))?;
    column.as_numeric().ok_or_else(|| {
        Error::validation(format!("Column '{}' is {}, expected numeric", name, column.kind()))
    })
}
