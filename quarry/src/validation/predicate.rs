use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

use crate::document::Document;
use crate::errors::QuarryResult;
use crate::validation::{AllowedFeatures, FeatureVersion};

/// A compiled boolean test over documents.
pub trait Predicate: Send + Sync + Debug {
    fn matches(&self, doc: &Document) -> QuarryResult<bool>;

    /// Structured description of why `doc` does not match.
    fn explain_failure(&self, _doc: &Document) -> Option<Value> {
        None
    }
}

/// Turns a validator document into a [`Predicate`].
pub trait PredicateCompiler: Send + Sync {
    /// Compiles `spec`, refusing features outside `allowed` and operators
    /// newer than `max_version` when a ceiling is given.
    fn compile(
        &self,
        spec: &Document,
        allowed: AllowedFeatures,
        max_version: Option<FeatureVersion>,
    ) -> QuarryResult<Arc<dyn Predicate>>;
}
