//! Classifier registry: tag → classifier capability

use crate::model::ClassificationResult;
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque detector capability.
///
/// Implementations should return a low-confidence verdict for malformed
/// input rather than an error, and must not block indefinitely.
pub trait Classifier: Send + Sync {
    fn predict(&self, text: &str) -> Result<ClassificationResult, ClassifierError>;
}

impl<F> Classifier for F
where
    F: Fn(&str) -> Result<ClassificationResult, ClassifierError> + Send + Sync,
{
    fn predict(&self, text: &str) -> Result<ClassificationResult, ClassifierError> {
        self(text)
    }
}

/// Explicit registry value; built once at startup and handed to the router
#[derive(Clone, Default)]
pub struct ClassifierRegistry {
    models: HashMap<String, Arc<dyn Classifier>>,
}

impl ClassifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: impl Into<String>, classifier: Arc<dyn Classifier>) {
        self.models.insert(tag.into(), classifier);
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Classifier>> {
        self.models.get(tag).cloned()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.models.contains_key(tag)
    }

    /// Registered tags, sorted
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.models.keys().cloned().collect();
        tags.sort();
        tags
    }
}

/// Classifier errors
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("No classifier registered for tag '{0}'")]
    NotRegistered(String),

    #[error("Classifier '{model}' failed: {reason}")]
    Failed { model: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Verdict;

    #[test]
    fn test_register_and_get() {
        let mut registry = ClassifierRegistry::new();
        registry.register(
            "sql",
            Arc::new(|_: &str| -> Result<ClassificationResult, ClassifierError> {
                Ok(ClassificationResult::new(Verdict::Malicious, 80.0))
            }),
        );
        assert!(registry.contains("sql"));
        assert!(registry.get("syn").is_none());
        let result = registry.get("sql").unwrap().predict("select").unwrap();
        assert_eq!(result.verdict, Verdict::Malicious);
        assert_eq!(registry.tags(), vec!["sql".to_string()]);
    }
}
