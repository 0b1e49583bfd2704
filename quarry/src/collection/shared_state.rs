use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use crate::catalog::{CollectionOptions, Namespace};
use crate::collection::generation::GenerationInner;
use crate::collection::CappedInsertNotifier;
use crate::common::{CollectionLock, Decorations, ExclusiveCollectionGuard, ResourceLock};
use crate::document::{Document, RecordId};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::store::{CappedCallback, RecordStore};
use crate::transaction::TransactionContext;

/// A generation tracked by the shared state. The table never keeps a
/// generation alive.
struct TrackedGeneration {
    id: u64,
    handle: Weak<GenerationInner>,
}

#[derive(Default)]
struct GenerationTable {
    latest: Option<TrackedGeneration>,
    previous: Option<TrackedGeneration>,
}

/// Capped eviction bookkeeping, guarded by the capped deletion mutex.
#[derive(Default)]
pub(crate) struct CappedDeleterState {
    /// Where the next eviction resumes; `None` starts from the front.
    pub(crate) first_record: Option<RecordId>,
}

/// State shared by every generation of one logical collection.
///
/// Owns the record store and the capped collection machinery, and tracks the
/// latest and previous generation so that deletes the record store performs on
/// its own always go through the current index definitions.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<SharedStateInner>,
}

pub(crate) struct SharedStateInner {
    ns: Namespace,
    record_store: Arc<dyn RecordStore>,
    is_capped: bool,
    capped_max_docs: i64,
    capped_max_size: AtomicI64,
    need_capped_lock: bool,
    capped_metadata_lock: ResourceLock,
    capped_notifier: Option<Arc<CappedInsertNotifier>>,
    capped_deleter: Mutex<CappedDeleterState>,
    generations: RwLock<GenerationTable>,
    collection_lock: CollectionLock,
    decorations: Decorations,
    committed: AtomicBool,
    collation: Document,
}

impl SharedState {
    pub(crate) fn new(ns: &Namespace, options: &CollectionOptions, record_store: Arc<dyn RecordStore>) -> Self {
        let inner = Arc::new(SharedStateInner {
            ns: ns.clone(),
            record_store,
            is_capped: options.capped,
            capped_max_docs: options.capped_max_docs,
            capped_max_size: AtomicI64::new(options.capped_size),
            need_capped_lock: options.capped && !ns.is_local(),
            capped_metadata_lock: ResourceLock::new(),
            capped_notifier: options.capped.then(|| Arc::new(CappedInsertNotifier::new())),
            capped_deleter: Mutex::new(CappedDeleterState::default()),
            generations: RwLock::new(GenerationTable::default()),
            collection_lock: CollectionLock::new(),
            decorations: Decorations::new(),
            committed: AtomicBool::new(false),
            collation: options.collation.clone(),
        });

        if inner.capped_notifier.is_some() {
            let callback: Weak<dyn CappedCallback> = Arc::downgrade(&inner) as Weak<dyn CappedCallback>;
            inner.record_store.set_capped_callback(Some(callback));
        }
        SharedState { inner }
    }

    pub fn ns(&self) -> &Namespace {
        &self.inner.ns
    }

    pub fn record_store(&self) -> &Arc<dyn RecordStore> {
        &self.inner.record_store
    }

    pub fn is_capped(&self) -> bool {
        self.inner.is_capped
    }

    pub fn capped_max_docs(&self) -> i64 {
        self.inner.capped_max_docs
    }

    pub fn capped_max_size(&self) -> i64 {
        self.inner.capped_max_size.load(Ordering::SeqCst)
    }

    pub(crate) fn set_capped_max_size(&self, size: i64) {
        self.inner.capped_max_size.store(size, Ordering::SeqCst);
    }

    /// Capped collections outside `local` serialize their writers.
    pub fn need_capped_lock(&self) -> bool {
        self.inner.need_capped_lock
    }

    pub(crate) fn capped_metadata_lock(&self) -> &ResourceLock {
        &self.inner.capped_metadata_lock
    }

    pub fn collection_lock(&self) -> &CollectionLock {
        &self.inner.collection_lock
    }

    pub fn decorations(&self) -> &Decorations {
        &self.inner.decorations
    }

    pub fn collation(&self) -> &Document {
        &self.inner.collation
    }

    pub(crate) fn is_committed(&self) -> bool {
        self.inner.committed.load(Ordering::Acquire)
    }

    pub(crate) fn store_committed(&self, committed: bool) {
        self.inner.committed.store(committed, Ordering::Release);
    }

    pub fn capped_insert_notifier(&self) -> Option<Arc<CappedInsertNotifier>> {
        self.inner.capped_notifier.clone()
    }

    /// True when anyone besides the shared state holds the notifier.
    pub fn have_capped_waiters(&self) -> bool {
        self.inner
            .capped_notifier
            .as_ref()
            .map(|notifier| Arc::strong_count(notifier) > 1)
            .unwrap_or(false)
    }

    pub fn notify_capped_waiters_if_needed(&self) {
        if self.have_capped_waiters() {
            if let Some(notifier) = &self.inner.capped_notifier {
                notifier.notify_all();
            }
        }
    }

    pub(crate) fn lock_capped_deleter(&self) -> MutexGuard<'_, CappedDeleterState> {
        self.inner.capped_deleter.lock()
    }

    /// Where the next capped eviction resumes.
    pub fn capped_first_record(&self) -> Option<RecordId> {
        self.inner.capped_deleter.lock().first_record.clone()
    }

    pub(crate) fn clear_capped_first_record(&self) {
        self.inner.capped_deleter.lock().first_record = None;
    }

    /// Makes `generation` the latest and demotes the current latest to
    /// previous. The caller proves exclusive ownership of the collection.
    pub(crate) fn install_new_generation(
        &self,
        id: u64,
        generation: Weak<GenerationInner>,
        guard: &ExclusiveCollectionGuard,
    ) -> QuarryResult<()> {
        if !self.inner.collection_lock.is_held_by(guard) {
            log::error!("Installing generation {} of {} without its collection lock", id, self.inner.ns);
            return Err(QuarryError::new(
                "A new generation needs the exclusive lock of its own collection",
                ErrorKind::InvalidOperation,
            ));
        }

        let mut table = self.inner.generations.write();
        table.previous = table.latest.take();
        table.latest = Some(TrackedGeneration { id, handle: generation });
        log::debug!("Generation {} is now the latest of {}", id, self.inner.ns);
        Ok(())
    }

    /// Forgets a generation that is going away. Retiring the latest promotes
    /// the previous one back, which undoes the install of a discarded clone.
    pub(crate) fn retire_generation(&self, id: u64) {
        self.inner.retire_generation(id);
    }

    pub fn latest_generation_id(&self) -> Option<u64> {
        self.inner.generations.read().latest.as_ref().map(|g| g.id)
    }

    pub fn previous_generation_id(&self) -> Option<u64> {
        self.inner.generations.read().previous.as_ref().map(|g| g.id)
    }

    /// True when both handles point at the same collection.
    pub fn ptr_eq(&self, other: &SharedState) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl SharedStateInner {
    fn retire_generation(&self, id: u64) {
        let mut table = self.generations.write();
        if table.previous.as_ref().map(|g| g.id) == Some(id) {
            table.previous = None;
        } else if table.latest.as_ref().map(|g| g.id) == Some(id) {
            table.latest = table.previous.take();
            log::debug!("Generation {} of {} retired, previous promoted", id, self.ns);
        }
    }

    fn target_generation(&self) -> Option<Arc<GenerationInner>> {
        let table = self.generations.read();
        table
            .latest
            .as_ref()
            .and_then(|g| g.handle.upgrade())
            .or_else(|| table.previous.as_ref().and_then(|g| g.handle.upgrade()))
    }
}

impl CappedCallback for SharedStateInner {
    fn about_to_delete_capped(&self, txn: &TransactionContext, id: &RecordId, data: &[u8]) -> QuarryResult<()> {
        let Some(generation) = self.target_generation() else {
            log::error!("No live generation of {} to unindex {}", self.ns, id);
            return Err(QuarryError::new(
                &format!("No live generation of {} to unindex {}", self.ns, id),
                ErrorKind::InternalError,
            ));
        };

        let doc = Document::from_bytes(data)?;
        // keys removed here are not reported to callers
        generation.indexes().unindex_record(txn, &doc, id, false)?;
        Ok(())
    }
}

impl Drop for SharedStateInner {
    fn drop(&mut self) {
        if let Some(notifier) = &self.capped_notifier {
            self.record_store.set_capped_callback(None);
            notifier.kill();
        }
    }
}
