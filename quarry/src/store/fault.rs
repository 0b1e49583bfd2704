use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::document::{DamageEvent, KeyFormat, RecordId};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::store::{CappedCallback, NewRecord, RecordCursor, RecordStore};
use crate::transaction::TransactionContext;

/// Record store operations a fault can be armed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultTarget {
    Insert,
    Update,
    Delete,
}

/// Wraps a record store and fails selected operations with a write conflict,
/// the same failure a contended store would produce.
pub struct FaultInjectingRecordStore {
    inner: Arc<dyn RecordStore>,
    armed: Mutex<HashMap<FaultTarget, u32>>,
}

impl FaultInjectingRecordStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        FaultInjectingRecordStore {
            inner,
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Fails the next `times` calls of `target`.
    pub fn fail_next(&self, target: FaultTarget, times: u32) {
        self.armed.lock().insert(target, times);
    }

    pub fn disarm(&self) {
        self.armed.lock().clear();
    }

    pub fn remaining(&self, target: FaultTarget) -> u32 {
        self.armed.lock().get(&target).copied().unwrap_or(0)
    }

    fn check(&self, target: FaultTarget) -> QuarryResult<()> {
        let mut armed = self.armed.lock();
        match armed.get_mut(&target) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                log::debug!("Injecting write conflict into {:?} on {}", target, self.inner.ident());
                Err(QuarryError::new(
                    &format!("WriteConflict error: injected into {:?}", target),
                    ErrorKind::WriteConflict,
                ))
            }
            _ => Ok(()),
        }
    }
}

impl RecordStore for FaultInjectingRecordStore {
    fn ident(&self) -> &str {
        self.inner.ident()
    }

    fn key_format(&self) -> KeyFormat {
        self.inner.key_format()
    }

    fn insert_records(&self, txn: &TransactionContext, records: Vec<NewRecord>) -> QuarryResult<Vec<RecordId>> {
        self.check(FaultTarget::Insert)?;
        self.inner.insert_records(txn, records)
    }

    fn update_record(&self, txn: &TransactionContext, id: &RecordId, data: &[u8]) -> QuarryResult<()> {
        self.check(FaultTarget::Update)?;
        self.inner.update_record(txn, id, data)
    }

    fn update_with_damages_supported(&self) -> bool {
        self.inner.update_with_damages_supported()
    }

    fn update_with_damages(
        &self,
        txn: &TransactionContext,
        id: &RecordId,
        old_data: &[u8],
        damage_source: &[u8],
        damages: &[DamageEvent],
    ) -> QuarryResult<Vec<u8>> {
        self.check(FaultTarget::Update)?;
        self.inner.update_with_damages(txn, id, old_data, damage_source, damages)
    }

    fn delete_record(&self, txn: &TransactionContext, id: &RecordId) -> QuarryResult<()> {
        self.check(FaultTarget::Delete)?;
        self.inner.delete_record(txn, id)
    }

    fn find_record(&self, txn: &TransactionContext, id: &RecordId) -> QuarryResult<Option<Vec<u8>>> {
        self.inner.find_record(txn, id)
    }

    fn cursor(&self, txn: &TransactionContext, forward: bool) -> QuarryResult<Box<dyn RecordCursor>> {
        self.inner.cursor(txn, forward)
    }

    fn data_size(&self, txn: &TransactionContext) -> i64 {
        self.inner.data_size(txn)
    }

    fn num_records(&self, txn: &TransactionContext) -> i64 {
        self.inner.num_records(txn)
    }

    fn truncate(&self, txn: &TransactionContext) -> QuarryResult<()> {
        self.inner.truncate(txn)
    }

    fn capped_truncate_after(&self, txn: &TransactionContext, end: &RecordId, inclusive: bool) -> QuarryResult<()> {
        self.inner.capped_truncate_after(txn, end, inclusive)
    }

    fn set_capped_callback(&self, callback: Option<Weak<dyn CappedCallback>>) {
        self.inner.set_capped_callback(callback)
    }

    fn self_managed_oplog_truncation(&self) -> bool {
        self.inner.self_managed_oplog_truncation()
    }

    fn update_oplog_size(&self, size: i64) -> QuarryResult<()> {
        self.inner.update_oplog_size(size)
    }
}
