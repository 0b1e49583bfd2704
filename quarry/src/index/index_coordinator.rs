use serde_json::Value;

use crate::common::Timestamp;
use crate::document::{Document, RecordId};
use crate::errors::QuarryResult;
use crate::index::IndexSpec;
use crate::transaction::TransactionContext;

/// A freshly inserted document on its way into the indexes.
#[derive(Debug, Clone, Copy)]
pub struct IndexedRecord<'a> {
    pub id: &'a RecordId,
    pub timestamp: Timestamp,
    pub doc: &'a Document,
}

impl<'a> IndexedRecord<'a> {
    pub fn new(id: &'a RecordId, timestamp: Timestamp, doc: &'a Document) -> Self {
        IndexedRecord { id, timestamp, doc }
    }
}

/// The index catalog as seen by the collection write paths.
///
/// Key maintenance registers its own undo with the transaction. Structural
/// changes (create, drop, finishing a build) are made on the catalog of a
/// freshly cloned generation while the collection is locked exclusively.
pub trait IndexCoordinator: Send + Sync {
    /// Copy of the catalog for a new generation.
    fn clone_for_generation(&self) -> Box<dyn IndexCoordinator>;

    /// The ready `_id` index, if the collection has one.
    fn find_id_index(&self) -> Option<IndexSpec>;

    fn find_index(&self, name: &str) -> Option<IndexSpec>;

    fn num_indexes_total(&self) -> usize;

    fn num_indexes_ready(&self) -> usize;

    fn num_indexes_in_progress(&self) -> usize {
        self.num_indexes_total() - self.num_indexes_ready()
    }

    fn has_any_indexes(&self) -> bool {
        self.num_indexes_total() > 0
    }

    fn specs(&self) -> Vec<IndexSpec>;

    /// Adds keys for every record to every index; returns the number of keys.
    fn index_records(&self, txn: &TransactionContext, records: &[IndexedRecord<'_>]) -> QuarryResult<i64>;

    /// Removes the keys of `doc`; returns the number of keys removed.
    fn unindex_record(
        &self,
        txn: &TransactionContext,
        doc: &Document,
        id: &RecordId,
        log_if_error: bool,
    ) -> QuarryResult<i64>;

    /// Moves the keys of a record whose document changed; returns
    /// `(keys_inserted, keys_deleted)`.
    fn update_record(
        &self,
        txn: &TransactionContext,
        old: &Document,
        new: &Document,
        id: &RecordId,
    ) -> QuarryResult<(i64, i64)>;

    fn lookup(&self, index_name: &str, key: &Value) -> QuarryResult<Vec<RecordId>>;

    fn create_index_on_empty_collection(&self, txn: &TransactionContext, spec: IndexSpec) -> QuarryResult<()>;

    /// Registers an index whose build has started but not finished.
    fn begin_index_build(&self, txn: &TransactionContext, spec: IndexSpec) -> QuarryResult<()>;

    fn index_build_success(&self, txn: &TransactionContext, index_name: &str) -> QuarryResult<()>;

    fn drop_all_indexes(&self, txn: &TransactionContext, include_id_index: bool) -> QuarryResult<()>;

    fn space_used_bytes(&self) -> u64;
}
