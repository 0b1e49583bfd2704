use std::sync::Arc;

use crate::catalog::{DurableCatalog, InMemoryDurableCatalog};
use crate::observer::{LogObserver, NoopObserver};
use crate::quarry_config::QuarryConfig;
use crate::validation::{MatchCompiler, PredicateCompiler};

/// Collaborators every collection of a process shares.
#[derive(Clone)]
pub struct CollectionServices {
    inner: Arc<CollectionServicesInner>,
}

struct CollectionServicesInner {
    config: QuarryConfig,
    observer: Arc<dyn LogObserver>,
    durable_catalog: Arc<dyn DurableCatalog>,
    compiler: Arc<dyn PredicateCompiler>,
}

impl CollectionServices {
    pub fn builder() -> CollectionServicesBuilder {
        CollectionServicesBuilder::default()
    }

    pub fn config(&self) -> &QuarryConfig {
        &self.inner.config
    }

    pub fn observer(&self) -> &Arc<dyn LogObserver> {
        &self.inner.observer
    }

    pub fn durable_catalog(&self) -> &Arc<dyn DurableCatalog> {
        &self.inner.durable_catalog
    }

    pub fn compiler(&self) -> &Arc<dyn PredicateCompiler> {
        &self.inner.compiler
    }
}

impl Default for CollectionServices {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`CollectionServices`]. Unset collaborators fall back to the
/// in-memory catalog, the match compiler and an observer that ignores events.
#[derive(Default)]
pub struct CollectionServicesBuilder {
    config: Option<QuarryConfig>,
    observer: Option<Arc<dyn LogObserver>>,
    durable_catalog: Option<Arc<dyn DurableCatalog>>,
    compiler: Option<Arc<dyn PredicateCompiler>>,
}

impl CollectionServicesBuilder {
    pub fn config(mut self, config: QuarryConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn LogObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn durable_catalog(mut self, catalog: Arc<dyn DurableCatalog>) -> Self {
        self.durable_catalog = Some(catalog);
        self
    }

    pub fn compiler(mut self, compiler: Arc<dyn PredicateCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn build(self) -> CollectionServices {
        CollectionServices {
            inner: Arc::new(CollectionServicesInner {
                config: self.config.unwrap_or_default(),
                observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
                durable_catalog: self
                    .durable_catalog
                    .unwrap_or_else(|| Arc::new(InMemoryDurableCatalog::new())),
                compiler: self.compiler.unwrap_or_else(|| Arc::new(MatchCompiler::new())),
            }),
        }
    }
}
