//! Transform lookup by method id

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
    CategoricalEncoding, Lagging, MethodInfo, MissingValues, Outliers, Pca, RollingStatistics,
    Standardization, StepParams, Transform,
};
use crate::error::{Error, Result};
use crate::types::PipelineConfig;

/// Registry of transforms keyed by method id
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: BTreeMap<&'static str, Arc<dyn Transform>>,
    /// Registration order, used for the catalogue
    order: Vec<&'static str>,
}

impl TransformRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in transform
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MissingValues));
        registry.register(Arc::new(Outliers));
        registry.register(Arc::new(Standardization));
        registry.register(Arc::new(CategoricalEncoding));
        registry.register(Arc::new(Pca));
        registry.register(Arc::new(Lagging));
        registry.register(Arc::new(RollingStatistics));
        registry
    }

    /// Add a transform, replacing any previous one with the same id
    pub fn register(&mut self, transform: Arc<dyn Transform>) {
        let id = transform.method_id();
        if self.transforms.insert(id, transform).is_none() {
            self.order.push(id);
        }
    }

    pub fn get(&self, method_id: &str) -> Option<Arc<dyn Transform>> {
        self.transforms.get(method_id).cloned()
    }

    pub fn contains(&self, method_id: &str) -> bool {
        self.transforms.contains_key(method_id)
    }

    /// Catalogue of registered transforms
    pub fn methods(&self) -> Vec<MethodInfo> {
        self.order
            .iter()
            .filter_map(|id| self.transforms.get(id))
            .map(|t| t.describe())
            .collect()
    }

    /// Reject a pipeline before any work is done: an empty method list, an
    /// unknown method id, or invalid parameters all fail with `Validation`.
    pub fn validate(&self, config: &PipelineConfig) -> Result<()> {
        if config.is_empty() {
            return Err(Error::validation("At least one preprocessing method is required"));
        }

        for (index, step) in config.methods.iter().enumerate() {
            let transform = self.get(&step.method_id).ok_or_else(|| {
                Error::validation(format!(
                    "Step {}: unknown method '{}' (available: {})",
                    index,
                    step.method_id,
                    self.order.join(", ")
                ))
            })?;
            transform
                .validate(&StepParams::new(&step.parameters))
                .map_err(|e| match e {
                    Error::Validation(msg) => Error::validation(format!(
                        "Step {} ({}): {}",
                        index, step.method_id, msg
                    )),
                    other => other,
                })?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("methods", &self.order)
            .finish()
    }
}
