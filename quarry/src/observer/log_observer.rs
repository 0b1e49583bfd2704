use uuid::Uuid;

use crate::catalog::Namespace;
use crate::common::{StmtId, Timestamp};
use crate::document::Document;
use crate::errors::QuarryResult;
use crate::transaction::TransactionContext;

/// One document of an insert batch, with the log slot reserved for it.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub stmt_id: Option<StmtId>,
    pub doc: Document,
    pub oplog_slot: Option<Timestamp>,
}

impl InsertStatement {
    pub fn new(doc: Document) -> Self {
        InsertStatement {
            stmt_id: None,
            doc,
            oplog_slot: None,
        }
    }

    pub fn with_stmt_id(mut self, stmt_id: StmtId) -> Self {
        self.stmt_id = Some(stmt_id);
        self
    }

    pub fn with_slot(mut self, slot: Timestamp) -> Self {
        self.oplog_slot = Some(slot);
        self
    }
}

/// Which image of an updated document a retryable write must keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreDocOption {
    #[default]
    None,
    PreImage,
    PostImage,
}

/// Description of one document update handed to the log observer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectionUpdateArgs {
    pub stmt_ids: Vec<StmtId>,
    /// Query that selects the updated document, `{_id: ...}`.
    pub criteria: Document,
    /// The update as applied, a replacement or a diff.
    pub update: Document,
    pub updated_doc: Document,
    pub pre_image_doc: Option<Document>,
    pub store_doc_option: StoreDocOption,
    pub pre_image_recording_enabled_for_collection: bool,
    pub from_migrate: bool,
}

impl CollectionUpdateArgs {
    pub fn new(update: Document) -> Self {
        CollectionUpdateArgs {
            update,
            ..Default::default()
        }
    }

    /// True when the pre-image has to be captured before the write.
    pub fn needs_pre_image(&self) -> bool {
        self.store_doc_option == StoreDocOption::PreImage
            || self.pre_image_recording_enabled_for_collection
    }
}

/// Whether a retryable delete keeps the removed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreDeletedDoc {
    #[default]
    Off,
    On,
}

/// Description of one delete handed to the log observer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OplogDeleteEntryArgs {
    pub deleted_doc: Option<Document>,
    pub from_migrate: bool,
    pub pre_image_recording_enabled_for_collection: bool,
    /// The delete was issued by capped eviction.
    pub capped_eviction: bool,
}

/// Replication hook notified synchronously on every write. A failure of any
/// callback fails the write.
pub trait LogObserver: Send + Sync {
    fn on_inserts(
        &self,
        _txn: &TransactionContext,
        _ns: &Namespace,
        _uuid: Uuid,
        _statements: &[InsertStatement],
        _from_migrate: bool,
    ) -> QuarryResult<()> {
        Ok(())
    }

    fn on_update(
        &self,
        _txn: &TransactionContext,
        _ns: &Namespace,
        _uuid: Uuid,
        _args: &CollectionUpdateArgs,
    ) -> QuarryResult<()> {
        Ok(())
    }

    /// Called with the full document before anything is removed.
    fn about_to_delete(
        &self,
        _txn: &TransactionContext,
        _ns: &Namespace,
        _uuid: Uuid,
        _doc: &Document,
    ) -> QuarryResult<()> {
        Ok(())
    }

    fn on_delete(
        &self,
        _txn: &TransactionContext,
        _ns: &Namespace,
        _uuid: Uuid,
        _stmt_id: Option<StmtId>,
        _args: &OplogDeleteEntryArgs,
    ) -> QuarryResult<()> {
        Ok(())
    }
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl LogObserver for NoopObserver {}
