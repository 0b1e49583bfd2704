use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::catalog::{CollectionOptions, Namespace};
use crate::document::Document;
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::index::IndexSpec;
use crate::transaction::TransactionContext;
use crate::validation::{ValidationAction, ValidationLevel};

/// Identifier of a collection's entry in the durable catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CatalogId(u64);

impl CatalogId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Display for CatalogId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CatalogId({})", self.0)
    }
}

/// Persisted metadata of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub ns: Namespace,
    pub options: CollectionOptions,
    pub indexes: Vec<IndexSpec>,
}

/// Persistent store of collection metadata. Updates are transactional and
/// roll back with the caller's unit of work.
pub trait DurableCatalog: Send + Sync {
    fn create_collection(
        &self,
        txn: &TransactionContext,
        ns: &Namespace,
        options: &CollectionOptions,
    ) -> QuarryResult<CatalogId>;

    fn get_entry(&self, id: CatalogId) -> QuarryResult<CatalogEntry>;

    fn get_collection_options(&self, id: CatalogId) -> QuarryResult<CollectionOptions> {
        Ok(self.get_entry(id)?.options)
    }

    fn update_validator(
        &self,
        txn: &TransactionContext,
        id: CatalogId,
        validator: &Document,
        level: Option<ValidationLevel>,
        action: Option<ValidationAction>,
    ) -> QuarryResult<()>;

    fn set_record_pre_images(&self, txn: &TransactionContext, id: CatalogId, enabled: bool) -> QuarryResult<()>;

    fn update_capped_size(&self, txn: &TransactionContext, id: CatalogId, size: i64) -> QuarryResult<()>;

    fn add_index(&self, txn: &TransactionContext, id: CatalogId, spec: &IndexSpec) -> QuarryResult<()>;
}

/// Durable catalog kept in memory.
#[derive(Clone, Default)]
pub struct InMemoryDurableCatalog {
    inner: Arc<InMemoryDurableCatalogInner>,
}

#[derive(Default)]
struct InMemoryDurableCatalogInner {
    entries: DashMap<CatalogId, CatalogEntry>,
    next_id: AtomicU64,
}

impl InMemoryDurableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn modify(
        &self,
        txn: &TransactionContext,
        id: CatalogId,
        change: impl FnOnce(&mut CatalogEntry),
    ) -> QuarryResult<()> {
        let before = {
            let mut entry = self.inner.entries.get_mut(&id).ok_or_else(|| entry_not_found(id))?;
            let before = entry.clone();
            change(&mut entry);
            before
        };

        let inner = self.inner.clone();
        txn.on_rollback(move || {
            inner.entries.insert(id, before);
        });
        Ok(())
    }
}

impl DurableCatalog for InMemoryDurableCatalog {
    fn create_collection(
        &self,
        txn: &TransactionContext,
        ns: &Namespace,
        options: &CollectionOptions,
    ) -> QuarryResult<CatalogId> {
        options.validate()?;
        if self.inner.entries.iter().any(|entry| &entry.ns == ns) {
            log::error!("Collection {} already exists", ns);
            return Err(QuarryError::new(
                &format!("Collection {} already exists", ns),
                ErrorKind::InvalidNamespace,
            ));
        }

        let id = CatalogId(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut options = options.clone();
        options.uuid.get_or_insert_with(uuid::Uuid::new_v4);
        self.inner.entries.insert(
            id,
            CatalogEntry {
                ns: ns.clone(),
                options,
                indexes: Vec::new(),
            },
        );

        let inner = self.inner.clone();
        txn.on_rollback(move || {
            inner.entries.remove(&id);
        });
        log::debug!("Created catalog entry {} for {}", id, ns);
        Ok(id)
    }

    fn get_entry(&self, id: CatalogId) -> QuarryResult<CatalogEntry> {
        self.inner
            .entries
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| entry_not_found(id))
    }

    fn update_validator(
        &self,
        txn: &TransactionContext,
        id: CatalogId,
        validator: &Document,
        level: Option<ValidationLevel>,
        action: Option<ValidationAction>,
    ) -> QuarryResult<()> {
        self.modify(txn, id, |entry| {
            entry.options.validator = validator.clone();
            entry.options.validation_level = level;
            entry.options.validation_action = action;
        })
    }

    fn set_record_pre_images(&self, txn: &TransactionContext, id: CatalogId, enabled: bool) -> QuarryResult<()> {
        self.modify(txn, id, |entry| entry.options.record_pre_images = enabled)
    }

    fn update_capped_size(&self, txn: &TransactionContext, id: CatalogId, size: i64) -> QuarryResult<()> {
        self.modify(txn, id, |entry| entry.options.capped_size = size)
    }

    fn add_index(&self, txn: &TransactionContext, id: CatalogId, spec: &IndexSpec) -> QuarryResult<()> {
        self.modify(txn, id, |entry| {
            if !entry.indexes.iter().any(|existing| existing.name == spec.name) {
                entry.indexes.push(spec.clone());
            }
        })
    }
}

fn entry_not_found(id: CatalogId) -> QuarryError {
    log::error!("No catalog entry for {}", id);
    QuarryError::new(&format!("No catalog entry for {}", id), ErrorKind::NotFound)
}
