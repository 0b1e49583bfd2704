use std::sync::Arc;

use crate::collection::CollectionGeneration;
use crate::document::{Document, RecordId};
use crate::errors::QuarryResult;
use crate::store::RecordCursor;
use crate::transaction::{SnapshotId, Snapshotted, TransactionContext};
use crate::validation::Predicate;

/// Order in which a collection scan visits records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanDirection {
    #[default]
    Forward,
    Backward,
}

/// Full scan over a collection in record id order.
///
/// Yields every document, tagged with the snapshot it was read from, or only
/// those matching a filter. The scan stops after the first error.
pub struct CollectionScan {
    cursor: Box<dyn RecordCursor>,
    snapshot_id: SnapshotId,
    filter: Option<Arc<dyn Predicate>>,
    done: bool,
}

impl CollectionScan {
    fn fail<T>(&mut self, result: QuarryResult<T>) -> Option<QuarryResult<(RecordId, Snapshotted<Document>)>> {
        self.done = true;
        result.err().map(Err)
    }
}

impl Iterator for CollectionScan {
    type Item = QuarryResult<(RecordId, Snapshotted<Document>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let record = match self.cursor.next() {
                Ok(Some(record)) => record,
                other => return self.fail(other),
            };

            let doc = match Document::from_bytes(&record.data) {
                Ok(doc) => doc,
                other => return self.fail(other),
            };

            if let Some(filter) = &self.filter {
                match filter.matches(&doc) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    other => return self.fail(other),
                }
            }
            return Some(Ok((record.id, Snapshotted::new(self.snapshot_id, doc))));
        }
        None
    }
}

impl CollectionGeneration {
    pub fn make_collection_scan(&self, txn: &TransactionContext, direction: ScanDirection) -> QuarryResult<CollectionScan> {
        Ok(CollectionScan {
            cursor: self.cursor(txn, direction == ScanDirection::Forward)?,
            snapshot_id: txn.snapshot_id(),
            filter: None,
            done: false,
        })
    }

    /// A scan that only yields documents matching `filter`.
    pub fn make_filtered_scan(
        &self,
        txn: &TransactionContext,
        direction: ScanDirection,
        filter: Arc<dyn Predicate>,
    ) -> QuarryResult<CollectionScan> {
        let mut scan = self.make_collection_scan(txn, direction)?;
        scan.filter = Some(filter);
        Ok(scan)
    }
}
