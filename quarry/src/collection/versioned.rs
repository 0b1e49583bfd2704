use std::sync::Arc;

use crate::catalog::{CatalogId, CollectionOptions, Namespace};
use crate::collection::{CollectionGeneration, CollectionServices};
use crate::common::{atomic, Atomic, ReadExecutor, WriteExecutor};
use crate::errors::QuarryResult;
use crate::store::RecordStore;
use crate::transaction::TransactionContext;

/// The catalog's handle on one collection.
///
/// Hands out the latest published generation. Document writes run against
/// that generation under the intent-exclusive collection lock; catalog
/// changes run against a fresh clone under the exclusive lock, and the clone
/// is published when the unit of work commits. Both locks are held until the
/// unit of work ends. Repeated writes in one unit of work reuse the held lock,
/// but a unit of work must not call [`VersionedCollection::modify`] after
/// writing to the same collection.
#[derive(Clone)]
pub struct VersionedCollection {
    inner: Arc<VersionedCollectionInner>,
}

struct VersionedCollectionInner {
    current: Atomic<CollectionGeneration>,
}

impl VersionedCollection {
    pub fn new(generation: CollectionGeneration) -> Self {
        VersionedCollection {
            inner: Arc::new(VersionedCollectionInner {
                current: atomic(generation),
            }),
        }
    }

    pub fn create(
        txn: &TransactionContext,
        services: &CollectionServices,
        ns: &Namespace,
        options: &CollectionOptions,
        record_store: Arc<dyn RecordStore>,
    ) -> QuarryResult<Self> {
        let generation = CollectionGeneration::create(txn, services, ns, options, record_store)?;
        Ok(Self::new(generation))
    }

    pub fn attach(
        txn: &TransactionContext,
        services: &CollectionServices,
        catalog_id: CatalogId,
        record_store: Arc<dyn RecordStore>,
    ) -> QuarryResult<Self> {
        let generation = CollectionGeneration::attach(txn, services, catalog_id, record_store)?;
        Ok(Self::new(generation))
    }

    /// The latest published generation.
    pub fn current(&self) -> CollectionGeneration {
        self.inner.current.read_with(|generation| generation.clone())
    }

    pub fn ns(&self) -> Namespace {
        self.inner.current.read_with(|generation| generation.ns().clone())
    }

    /// Runs document writes against the current generation.
    pub fn write<T>(
        &self,
        txn: &TransactionContext,
        work: impl FnOnce(&CollectionGeneration) -> QuarryResult<T>,
    ) -> QuarryResult<T> {
        let lock = self.current().shared().collection_lock().clone();
        // reuse the guard this unit of work already holds
        let guard = (!txn.holds_lock(lock.id())).then(|| lock.lock_intent_exclusive());
        // a catalog change may have published while we waited
        let generation = self.current();
        let result = work(&generation);
        if let Some(guard) = guard {
            txn.park_until_end_of_unit_of_work(lock.id(), guard);
        }
        result
    }

    /// Runs a catalog change against a clone of the current generation. The
    /// clone replaces the current generation when the unit of work commits
    /// and is thrown away when it rolls back.
    pub fn modify<T>(
        &self,
        txn: &TransactionContext,
        work: impl FnOnce(&CollectionGeneration) -> QuarryResult<T>,
    ) -> QuarryResult<T> {
        let lock = self.current().shared().collection_lock().clone();
        let guard = lock.lock_exclusive();
        let current = self.current();
        let clone = current.clone_for_ddl(&guard)?;

        let value = work(&clone)?;

        let slot = self.inner.current.clone();
        let id = clone.id();
        txn.on_commit(move |_| {
            log::debug!("Publishing generation {} of {}", id, clone.ns());
            slot.write_with(|current| *current = clone);
        });
        txn.park_until_end_of_unit_of_work(lock.id(), guard);
        Ok(value)
    }
}
