use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::common::{ResourceLock, Timestamp};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::transaction::SnapshotId;

/// Work to run once the outermost unit of work commits.
pub type CommitHook = Box<dyn FnOnce(Option<Timestamp>) + Send>;

/// Work to run if the outermost unit of work rolls back.
pub type RollbackHook = Box<dyn FnOnce() + Send>;

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SNAPSHOT_ID: AtomicU64 = AtomicU64::new(1);

fn next_snapshot_id() -> SnapshotId {
    NEXT_SNAPSHOT_ID.fetch_add(1, Ordering::SeqCst)
}

/// Per-operation flags that travel with a [`TransactionContext`].
#[derive(Debug, Clone)]
pub struct OperationOptions {
    enforce_constraints: bool,
    validation_disabled: bool,
    txn_number: Option<i64>,
}

impl Default for OperationOptions {
    fn default() -> Self {
        OperationOptions {
            enforce_constraints: true,
            validation_disabled: false,
            txn_number: None,
        }
    }
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Secondaries applying replicated writes do not enforce constraints.
    pub fn enforce_constraints(mut self, enforce: bool) -> Self {
        self.enforce_constraints = enforce;
        self
    }

    pub fn validation_disabled(mut self, disabled: bool) -> Self {
        self.validation_disabled = disabled;
        self
    }

    pub fn txn_number(mut self, txn_number: i64) -> Self {
        self.txn_number = Some(txn_number);
        self
    }
}

struct UnitOfWork {
    depth: u32,
    aborted: bool,
    snapshot_id: SnapshotId,
    commit_timestamp: Option<Timestamp>,
    commit_hooks: Vec<CommitHook>,
    rollback_hooks: Vec<RollbackHook>,
    held_locks: Vec<(usize, Box<dyn Send>)>,
}

impl UnitOfWork {
    fn new() -> Self {
        UnitOfWork {
            depth: 0,
            aborted: false,
            snapshot_id: next_snapshot_id(),
            commit_timestamp: None,
            commit_hooks: Vec::new(),
            rollback_hooks: Vec::new(),
            held_locks: Vec::new(),
        }
    }
}

/// The per-operation transactional context.
///
/// A unit of work groups storage writes so they commit or roll back together.
/// Units nest; only the outermost one commits, and a nested abort dooms the
/// outer unit. Components register commit and rollback hooks while they write,
/// and the context runs them when the outermost unit ends: commit hooks in
/// registration order, rollback hooks in reverse.
///
/// The snapshot id identifies the storage snapshot reads are served from. It
/// changes whenever the outermost unit ends or the snapshot is abandoned.
pub struct TransactionContext {
    id: u64,
    options: OperationOptions,
    validation_disabled: AtomicBool,
    unit: Mutex<UnitOfWork>,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::with_options(OperationOptions::default())
    }

    pub fn with_options(options: OperationOptions) -> Self {
        TransactionContext {
            id: NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst),
            validation_disabled: AtomicBool::new(options.validation_disabled),
            options,
            unit: Mutex::new(UnitOfWork::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_enforcing_constraints(&self) -> bool {
        self.options.enforce_constraints
    }

    pub fn is_validation_disabled(&self) -> bool {
        self.validation_disabled.load(Ordering::Acquire)
    }

    /// Turns document validation off (or back on) for the rest of the operation.
    pub fn set_validation_disabled(&self, disabled: bool) {
        self.validation_disabled.store(disabled, Ordering::Release);
    }

    pub fn txn_number(&self) -> Option<i64> {
        self.options.txn_number
    }

    pub fn snapshot_id(&self) -> SnapshotId {
        self.unit.lock().snapshot_id
    }

    pub fn in_unit_of_work(&self) -> bool {
        self.unit.lock().depth > 0
    }

    pub fn set_commit_timestamp(&self, timestamp: Timestamp) {
        self.unit.lock().commit_timestamp = Some(timestamp);
    }

    /// Moves reads to a fresh snapshot. Not allowed inside a unit of work.
    pub fn abandon_snapshot(&self) -> QuarryResult<()> {
        let mut unit = self.unit.lock();
        if unit.depth > 0 {
            log::error!("Cannot abandon snapshot of txn {} inside a unit of work", self.id);
            return Err(QuarryError::new(
                "Cannot abandon snapshot inside a unit of work",
                ErrorKind::InvalidOperation,
            ));
        }
        unit.snapshot_id = next_snapshot_id();
        Ok(())
    }

    pub fn begin_unit_of_work(&self) {
        self.unit.lock().depth += 1;
    }

    pub fn commit_unit_of_work(&self) -> QuarryResult<()> {
        let mut unit = self.unit.lock();
        if unit.depth == 0 {
            log::error!("Txn {} has no unit of work to commit", self.id);
            return Err(QuarryError::new(
                "No unit of work in progress",
                ErrorKind::InvalidOperation,
            ));
        }

        unit.depth -= 1;
        if unit.depth > 0 {
            return Ok(());
        }

        let aborted = unit.aborted;
        let timestamp = unit.commit_timestamp.take();
        let commit_hooks = std::mem::take(&mut unit.commit_hooks);
        let rollback_hooks = std::mem::take(&mut unit.rollback_hooks);
        let held_locks = std::mem::take(&mut unit.held_locks);
        unit.aborted = false;
        unit.snapshot_id = next_snapshot_id();
        drop(unit);

        if aborted {
            rollback_hooks.into_iter().rev().for_each(|hook| hook());
            drop(held_locks);
            log::error!("Txn {} committed a unit of work with an aborted nested unit", self.id);
            return Err(QuarryError::new(
                "Unit of work was aborted by a nested unit of work",
                ErrorKind::InvalidOperation,
            ));
        }

        drop(rollback_hooks);
        commit_hooks.into_iter().for_each(|hook| hook(timestamp));
        drop(held_locks);
        Ok(())
    }

    pub fn abort_unit_of_work(&self) {
        let mut unit = self.unit.lock();
        if unit.depth == 0 {
            log::warn!("Txn {} has no unit of work to abort", self.id);
            return;
        }

        unit.depth -= 1;
        if unit.depth > 0 {
            unit.aborted = true;
            return;
        }

        let rollback_hooks = std::mem::take(&mut unit.rollback_hooks);
        let commit_hooks = std::mem::take(&mut unit.commit_hooks);
        let held_locks = std::mem::take(&mut unit.held_locks);
        unit.commit_timestamp = None;
        unit.aborted = false;
        unit.snapshot_id = next_snapshot_id();
        drop(unit);

        drop(commit_hooks);
        // LIFO order - undo in reverse
        rollback_hooks.into_iter().rev().for_each(|hook| hook());
        drop(held_locks);
    }

    /// Runs `work` inside a unit of work, committing on success and rolling
    /// back on error.
    pub fn unit_of_work<T>(
        &self,
        work: impl FnOnce(&TransactionContext) -> QuarryResult<T>,
    ) -> QuarryResult<T> {
        self.begin_unit_of_work();
        match work(self) {
            Ok(value) => {
                self.commit_unit_of_work()?;
                Ok(value)
            }
            Err(err) => {
                self.abort_unit_of_work();
                Err(err)
            }
        }
    }

    /// Runs `work` in a separate transaction that commits on its own,
    /// independent of this context's unit of work.
    pub fn run_side_transaction<T>(
        &self,
        work: impl FnOnce(&TransactionContext) -> QuarryResult<T>,
    ) -> QuarryResult<T> {
        let options = OperationOptions {
            txn_number: None,
            ..self.options.clone()
        };
        let side = TransactionContext::with_options(options);
        side.set_validation_disabled(self.is_validation_disabled());
        side.unit_of_work(work)
    }

    /// Registers work to run after the outermost unit of work commits.
    /// Outside a unit of work the hook runs immediately.
    pub fn on_commit(&self, hook: impl FnOnce(Option<Timestamp>) + Send + 'static) {
        let mut unit = self.unit.lock();
        if unit.depth == 0 {
            drop(unit);
            hook(None);
            return;
        }
        unit.commit_hooks.push(Box::new(hook));
    }

    /// Registers undo work for the current unit of work.
    /// Outside a unit of work writes are already durable and the hook is dropped.
    pub fn on_rollback(&self, hook: impl FnOnce() + Send + 'static) {
        let mut unit = self.unit.lock();
        if unit.depth > 0 {
            unit.rollback_hooks.push(Box::new(hook));
        }
    }

    /// Acquires `lock` and keeps it until the outermost unit of work ends.
    /// Re-acquiring a lock this context already holds is a no-op.
    pub fn hold_until_end_of_unit_of_work(&self, lock: &ResourceLock) {
        {
            let unit = self.unit.lock();
            if unit.depth > 0 && unit.held_locks.iter().any(|(id, _)| *id == lock.id()) {
                return;
            }
        }

        // block without holding the unit mutex
        let guard = lock.acquire();
        let mut unit = self.unit.lock();
        if unit.depth > 0 {
            unit.held_locks.push((lock.id(), Box::new(guard)));
        }
    }

    /// Parks a guard taken on the lock identified by `lock_id` until the
    /// outermost unit of work ends.
    pub(crate) fn park_until_end_of_unit_of_work(&self, lock_id: usize, guard: impl Send + 'static) {
        let mut unit = self.unit.lock();
        if unit.depth > 0 {
            unit.held_locks.push((lock_id, Box::new(guard)));
        }
    }

    /// True when the open unit of work already parked a guard on `lock_id`.
    pub(crate) fn holds_lock(&self, lock_id: usize) -> bool {
        let unit = self.unit.lock();
        unit.depth > 0 && unit.held_locks.iter().any(|(id, _)| *id == lock_id)
    }

    pub fn pending_hooks(&self) -> usize {
        let unit = self.unit.lock();
        unit.commit_hooks.len() + unit.rollback_hooks.len()
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for TransactionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let unit = self.unit.lock();
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("depth", &unit.depth)
            .field("snapshot_id", &unit.snapshot_id)
            .field("options", &self.options)
            .finish()
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        let depth = self.unit.lock().depth;
        if depth > 0 {
            log::warn!("Txn {} dropped with an open unit of work, rolling back", self.id);
            for _ in 0..depth {
                self.abort_unit_of_work();
            }
        }
    }
}
