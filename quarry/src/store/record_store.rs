use std::sync::Weak;

use crate::common::Timestamp;
use crate::document::{DamageEvent, KeyFormat, RecordId};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::transaction::TransactionContext;

/// A stored record: its id and its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub data: Vec<u8>,
}

/// A record to insert. Without an id, a store with [`KeyFormat::Long`] assigns
/// the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub id: Option<RecordId>,
    pub data: Vec<u8>,
    pub timestamp: Timestamp,
}

impl NewRecord {
    pub fn new(data: Vec<u8>) -> Self {
        NewRecord {
            id: None,
            data,
            timestamp: 0,
        }
    }

    pub fn with_id(id: RecordId, data: Vec<u8>) -> Self {
        NewRecord {
            id: Some(id),
            data,
            timestamp: 0,
        }
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Positioned iteration over a record store in key order.
pub trait RecordCursor: Send {
    /// Returns the record after the current position.
    fn next(&mut self) -> QuarryResult<Option<Record>>;

    /// Positions the cursor on `id` and returns it, or `None` if it is gone.
    fn seek_exact(&mut self, id: &RecordId) -> QuarryResult<Option<Record>>;
}

/// Hook a record store calls before it removes a record on its own, e.g. when
/// truncating a capped collection.
pub trait CappedCallback: Send + Sync {
    fn about_to_delete_capped(
        &self,
        txn: &TransactionContext,
        id: &RecordId,
        data: &[u8],
    ) -> QuarryResult<()>;
}

/// Ordered map from [`RecordId`] to bytes, the physical home of a collection.
///
/// Every write takes the caller's [`TransactionContext`] and must undo itself if
/// the caller's unit of work rolls back. A write that touches a record owned by
/// another uncommitted unit of work fails with a write conflict.
pub trait RecordStore: Send + Sync {
    fn ident(&self) -> &str;

    fn key_format(&self) -> KeyFormat;

    /// Inserts `records` and returns their ids in input order.
    fn insert_records(
        &self,
        txn: &TransactionContext,
        records: Vec<NewRecord>,
    ) -> QuarryResult<Vec<RecordId>>;

    fn insert_record(&self, txn: &TransactionContext, record: NewRecord) -> QuarryResult<RecordId> {
        let mut ids = self.insert_records(txn, vec![record])?;
        match ids.pop() {
            Some(id) => Ok(id),
            None => Err(QuarryError::new(
                "Record store returned no id for an insert",
                ErrorKind::InternalError,
            )),
        }
    }

    fn update_record(&self, txn: &TransactionContext, id: &RecordId, data: &[u8]) -> QuarryResult<()>;

    fn update_with_damages_supported(&self) -> bool;

    /// Patches the record in place and returns the new bytes.
    fn update_with_damages(
        &self,
        txn: &TransactionContext,
        id: &RecordId,
        old_data: &[u8],
        damage_source: &[u8],
        damages: &[DamageEvent],
    ) -> QuarryResult<Vec<u8>>;

    fn delete_record(&self, txn: &TransactionContext, id: &RecordId) -> QuarryResult<()>;

    fn find_record(&self, txn: &TransactionContext, id: &RecordId) -> QuarryResult<Option<Vec<u8>>>;

    fn cursor(&self, txn: &TransactionContext, forward: bool) -> QuarryResult<Box<dyn RecordCursor>>;

    fn data_size(&self, txn: &TransactionContext) -> i64;

    fn num_records(&self, txn: &TransactionContext) -> i64;

    /// Removes every record.
    fn truncate(&self, txn: &TransactionContext) -> QuarryResult<()>;

    /// Removes every record after `end`, and `end` itself when `inclusive`.
    /// Calls the capped callback for each removed record.
    fn capped_truncate_after(
        &self,
        txn: &TransactionContext,
        end: &RecordId,
        inclusive: bool,
    ) -> QuarryResult<()>;

    fn set_capped_callback(&self, callback: Option<Weak<dyn CappedCallback>>);

    /// Stores that truncate the oplog themselves need no capped eviction.
    fn self_managed_oplog_truncation(&self) -> bool {
        false
    }

    fn update_oplog_size(&self, _size: i64) -> QuarryResult<()> {
        Ok(())
    }
}
