use parking_lot::lock_api::{ArcMutexGuard, ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawMutex, RawRwLock, RwLock};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Hierarchical lock of one logical collection.
///
/// Writers take it in intent-exclusive mode, which is compatible with other
/// writers. Catalog mutations take it exclusively. Guards own an `Arc` of the
/// lock so they can be parked on a transaction until its unit of work ends.
#[derive(Clone, Default)]
pub struct CollectionLock {
    inner: Arc<RwLock<()>>,
}

impl CollectionLock {
    pub fn new() -> Self {
        CollectionLock {
            inner: Arc::new(RwLock::new(())),
        }
    }

    pub fn lock_exclusive(&self) -> ExclusiveCollectionGuard {
        ExclusiveCollectionGuard {
            _guard: self.inner.write_arc(),
            lock_id: self.id(),
        }
    }

    pub fn try_lock_exclusive(&self) -> Option<ExclusiveCollectionGuard> {
        self.inner
            .try_write_arc()
            .map(|guard| ExclusiveCollectionGuard {
                _guard: guard,
                lock_id: self.id(),
            })
    }

    pub fn lock_intent_exclusive(&self) -> IntentExclusiveGuard {
        IntentExclusiveGuard {
            _guard: self.inner.read_arc(),
        }
    }

    pub fn is_locked_exclusive(&self) -> bool {
        self.inner.is_locked_exclusive()
    }

    /// Returns true if `guard` was taken on this lock.
    pub fn is_held_by(&self, guard: &ExclusiveCollectionGuard) -> bool {
        guard.lock_id == self.id()
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl Debug for CollectionLock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionLock")
            .field("exclusive", &self.is_locked_exclusive())
            .finish()
    }
}

/// Proof that the holder owns a collection in exclusive mode.
pub struct ExclusiveCollectionGuard {
    _guard: ArcRwLockWriteGuard<RawRwLock, ()>,
    lock_id: usize,
}

/// Proof that the holder may write documents into a collection.
pub struct IntentExclusiveGuard {
    _guard: ArcRwLockReadGuard<RawRwLock, ()>,
}

/// A plain resource lock that is parked on a transaction and released when
/// the transaction's outermost unit of work ends.
#[derive(Clone, Default)]
pub struct ResourceLock {
    inner: Arc<Mutex<()>>,
}

impl ResourceLock {
    pub fn new() -> Self {
        ResourceLock {
            inner: Arc::new(Mutex::new(())),
        }
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn acquire(&self) -> ArcMutexGuard<RawMutex, ()> {
        self.inner.lock_arc()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}
