use crate::collection::CollectionGeneration;
use crate::common::{
    fail_point, StmtId, CORRUPT_DOCUMENT_ON_INSERT, FAIL_AFTER_BULK_LOAD_DOC_INSERT,
    FAIL_COLLECTION_INSERTS, HANG_AFTER_COLLECTION_INSERTS,
};
use crate::document::{DamageEvent, Document, RecordId, DOC_ID};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::index::IndexedRecord;
use crate::observer::{CollectionUpdateArgs, InsertStatement, OplogDeleteEntryArgs, StoreDeletedDoc};
use crate::store::{write_conflict, NewRecord};
use crate::transaction::{Snapshotted, TransactionContext};

/// Index key counters of one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpDebug {
    pub keys_inserted: i64,
    pub keys_deleted: i64,
}

impl OpDebug {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_keys_inserted(&mut self, keys: i64) {
        self.keys_inserted += keys;
    }

    pub fn increment_keys_deleted(&mut self, keys: i64) {
        self.keys_deleted += keys;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    pub stmt_id: Option<StmtId>,
    pub from_migrate: bool,
    /// Skip the warning when the document has no index keys.
    pub no_warn: bool,
    pub store_deleted_doc: StoreDeletedDoc,
}

impl CollectionGeneration {
    fn require_unit_of_work(&self, txn: &TransactionContext, operation: &str) -> QuarryResult<()> {
        if !txn.in_unit_of_work() {
            log::error!("{} on {} outside a unit of work", operation, self.ns());
            return Err(QuarryError::new(
                &format!("{} on {} requires a unit of work", operation, self.ns()),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn check_fail_collection_inserts(&self, first: Option<&Document>) -> QuarryResult<()> {
        let ns = self.ns().ns();
        if let Some(data) = fail_point(FAIL_COLLECTION_INSERTS).check_for_namespace(&ns) {
            let message = format!(
                "Failpoint (failCollectionInserts) has been enabled ({}), so rejecting insert (first doc): {}",
                data,
                first.map(|doc| doc.to_string()).unwrap_or_default()
            );
            log::info!("{}", message);
            return Err(QuarryError::new(&message, ErrorKind::FailPointEnabled));
        }
        Ok(())
    }

    fn check_snapshot(&self, txn: &TransactionContext, expected: u64, operation: &str) -> QuarryResult<()> {
        if txn.snapshot_id() != expected {
            log::error!("Snapshot of txn {} moved during {} on {}", txn.id(), operation, self.ns());
            return Err(QuarryError::new(
                &format!(
                    "{} on {} started on snapshot {} but ended on {}",
                    operation,
                    self.ns(),
                    expected,
                    txn.snapshot_id()
                ),
                ErrorKind::SnapshotMismatch,
            ));
        }
        Ok(())
    }

    fn register_capped_wake_up(&self, txn: &TransactionContext) {
        if self.is_capped() {
            let shared = self.shared().clone();
            txn.on_commit(move |_| shared.notify_capped_waiters_if_needed());
        }
    }

    fn record_id_for(&self, doc: &Document) -> QuarryResult<Option<RecordId>> {
        if !self.is_clustered() {
            return Ok(None);
        }
        match doc.id() {
            Some(id) => Ok(Some(RecordId::from_id_value(id))),
            None => Err(QuarryError::new(
                &format!("Document in clustered collection {} has no _id", self.ns()),
                ErrorKind::MissingId,
            )),
        }
    }

    /// Inserts a batch of documents in the caller's unit of work.
    ///
    /// Records, index keys and the observer notification are written in that
    /// order, followed by capped eviction. A failure leaves partial work
    /// behind for the caller's unit of work to roll back.
    pub fn insert_documents(
        &self,
        txn: &TransactionContext,
        statements: Vec<InsertStatement>,
        mut op_debug: Option<&mut OpDebug>,
        from_migrate: bool,
    ) -> QuarryResult<()> {
        self.require_unit_of_work(txn, "insert")?;
        self.check_fail_collection_inserts(statements.first().map(|s| &s.doc))?;
        if statements.is_empty() {
            return Ok(());
        }

        if self.is_capped() && self.indexes().has_any_indexes() && statements.len() > 1 {
            return Err(QuarryError::new(
                "Can't batch inserts into indexed capped collections",
                ErrorKind::OperationCannotBeBatched,
            ));
        }

        let has_id_index = self.indexes().find_id_index().is_some();
        let validation = self.validation();
        for statement in &statements {
            if has_id_index && !statement.doc.contains_key(DOC_ID) {
                log::error!("Insert into {} got a document without _id", self.ns());
                return Err(QuarryError::new(
                    &format!("Collection::insertDocument got document without _id for ns:{}", self.ns()),
                    ErrorKind::MissingId,
                ));
            }
            validation.check_document(txn, self.ns(), &statement.doc)?;
        }

        let snapshot_id = txn.snapshot_id();
        if self.shared().need_capped_lock() {
            txn.hold_until_end_of_unit_of_work(self.shared().capped_metadata_lock());
        }

        let corrupt = fail_point(CORRUPT_DOCUMENT_ON_INSERT)
            .check_for_namespace(&self.ns().ns())
            .is_some();
        let mut records = Vec::with_capacity(statements.len());
        for statement in &statements {
            let mut data = statement.doc.to_bytes()?;
            if corrupt {
                data.truncate(data.len() / 2);
            }
            let record = match self.record_id_for(&statement.doc)? {
                Some(id) => NewRecord::with_id(id, data),
                None => NewRecord::new(data),
            };
            records.push(record.at(statement.oplog_slot.unwrap_or_default()));
        }

        let ids = self.record_store().insert_records(txn, records)?;
        let indexed: Vec<IndexedRecord<'_>> = ids
            .iter()
            .zip(&statements)
            .map(|(id, statement)| IndexedRecord::new(id, statement.oplog_slot.unwrap_or_default(), &statement.doc))
            .collect();
        let keys_inserted = self.indexes().index_records(txn, &indexed)?;
        if let Some(op_debug) = op_debug.as_mut() {
            op_debug.increment_keys_inserted(keys_inserted);
        }

        self.services()
            .observer()
            .on_inserts(txn, self.ns(), self.uuid(), &statements, from_migrate)?;
        self.capped_delete_as_needed(txn, &ids)?;

        fail_point(HANG_AFTER_COLLECTION_INSERTS).pause_while_set_for(&self.ns().ns());
        self.check_snapshot(txn, snapshot_id, "insert")?;
        self.register_capped_wake_up(txn);
        Ok(())
    }

    pub fn insert_document(
        &self,
        txn: &TransactionContext,
        statement: InsertStatement,
        op_debug: Option<&mut OpDebug>,
        from_migrate: bool,
    ) -> QuarryResult<()> {
        self.insert_documents(txn, vec![statement], op_debug, from_migrate)
    }

    /// Inserts one document without maintaining indexes; the bulk loader
    /// builds the keys through `on_record_inserted`.
    pub fn insert_document_for_bulk_loader(
        &self,
        txn: &TransactionContext,
        doc: &Document,
        on_record_inserted: impl FnOnce(&RecordId) -> QuarryResult<()>,
    ) -> QuarryResult<RecordId> {
        self.require_unit_of_work(txn, "bulk load insert")?;
        self.check_fail_collection_inserts(Some(doc))?;
        self.check_validation(txn, doc)?;

        let data = doc.to_bytes()?;
        let record = match self.record_id_for(doc)? {
            Some(id) => NewRecord::with_id(id, data),
            None => NewRecord::new(data),
        };
        let id = self.record_store().insert_record(txn, record)?;
        on_record_inserted(&id)?;

        if fail_point(FAIL_AFTER_BULK_LOAD_DOC_INSERT)
            .check_for_namespace(&self.ns().ns())
            .is_some()
        {
            log::info!("Failpoint failAfterBulkLoadDocInsert enabled for {}. Raising write conflict", self.ns());
            return Err(write_conflict());
        }

        let mut statement = InsertStatement::new(doc.clone());
        if self.ns().is_replicated() {
            statement = statement.with_slot(self.services().config().next_op_time());
        }
        self.services()
            .observer()
            .on_inserts(txn, self.ns(), self.uuid(), &[statement], false)?;
        self.capped_delete_as_needed(txn, std::slice::from_ref(&id))?;
        self.register_capped_wake_up(txn);
        Ok(id)
    }

    /// Raw insert path of an oplog-like collection: no validator, no
    /// indexes and no observer.
    pub fn insert_documents_for_oplog(
        &self,
        txn: &TransactionContext,
        records: Vec<NewRecord>,
    ) -> QuarryResult<Vec<RecordId>> {
        self.require_unit_of_work(txn, "oplog insert")?;
        if !self.validator().is_inactive() || self.indexes().has_any_indexes() {
            log::error!("Oplog insert into {} which has a validator or indexes", self.ns());
            return Err(QuarryError::new(
                &format!("{} must have neither a validator nor indexes for oplog inserts", self.ns()),
                ErrorKind::InvalidOperation,
            ));
        }
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let ids = self.record_store().insert_records(txn, records)?;
        self.capped_delete_as_needed(txn, &ids)?;
        self.register_capped_wake_up(txn);
        Ok(ids)
    }

    /// Replaces the document stored under `id` with `new_doc` and returns the
    /// id, which never changes.
    ///
    /// `old_doc` must have been read in the caller's current snapshot. The
    /// pre-image is put into `args` unless the caller already did, and
    /// `args.updated_doc` receives the new document.
    #[allow(clippy::too_many_arguments)]
    pub fn update_document(
        &self,
        txn: &TransactionContext,
        id: &RecordId,
        old_doc: &Snapshotted<Document>,
        new_doc: Document,
        indexes_affected: bool,
        mut op_debug: Option<&mut OpDebug>,
        args: &mut CollectionUpdateArgs,
    ) -> QuarryResult<RecordId> {
        self.require_unit_of_work(txn, "update")?;
        self.check_snapshot(txn, old_doc.snapshot_id(), "update")?;
        self.validation()
            .check_update(txn, self.ns(), old_doc.value(), &new_doc)?;

        if let Some(old_id) = old_doc.value().get(DOC_ID) {
            if new_doc.get(DOC_ID) != Some(old_id) {
                return Err(QuarryError::new("_id mismatch in update", ErrorKind::IdMismatch));
            }
        }

        if self.shared().need_capped_lock() {
            txn.hold_until_end_of_unit_of_work(self.shared().capped_metadata_lock());
        }
        let snapshot_id = txn.snapshot_id();

        if self.is_capped() {
            let (old_size, new_size) = (old_doc.value().byte_size(), new_doc.byte_size());
            if old_size != new_size {
                return Err(QuarryError::new(
                    &format!(
                        "Cannot change the size of a document in a capped collection: {} != {}",
                        old_size, new_size
                    ),
                    ErrorKind::CannotGrowDocumentInCappedNamespace,
                ));
            }
        }

        if args.pre_image_doc.is_none() {
            args.pre_image_doc = Some(old_doc.value().clone());
        }
        args.pre_image_recording_enabled_for_collection = self.record_pre_images();

        self.record_store().update_record(txn, id, &new_doc.to_bytes()?)?;
        if indexes_affected {
            let pre_image = args.pre_image_doc.as_ref().unwrap_or(old_doc.value());
            let (inserted, deleted) = self.indexes().update_record(txn, pre_image, &new_doc, id)?;
            if let Some(op_debug) = op_debug.as_mut() {
                op_debug.increment_keys_inserted(inserted);
                op_debug.increment_keys_deleted(deleted);
            }
        }

        self.check_snapshot(txn, snapshot_id, "update")?;
        args.updated_doc = new_doc;
        self.services().observer().on_update(txn, self.ns(), self.uuid(), args)?;
        Ok(id.clone())
    }

    /// In-place updates skip validation, so they are only offered when no
    /// validator is in effect.
    pub fn update_with_damages_supported(&self) -> bool {
        let validator = self.validator();
        if !validator.is_ok() || validator.predicate().is_some() {
            return false;
        }
        self.record_store().update_with_damages_supported()
    }

    /// Patches the stored bytes of `old_doc` in place and returns the new
    /// document. Index keys are left alone.
    pub fn update_document_with_damages(
        &self,
        txn: &TransactionContext,
        id: &RecordId,
        old_doc: &Snapshotted<Document>,
        damage_source: &[u8],
        damages: &[DamageEvent],
        args: &mut CollectionUpdateArgs,
    ) -> QuarryResult<Document> {
        self.require_unit_of_work(txn, "in-place update")?;
        self.check_snapshot(txn, old_doc.snapshot_id(), "in-place update")?;
        if !self.update_with_damages_supported() {
            log::error!("In-place update of {} is not supported", self.ns());
            return Err(QuarryError::new(
                &format!("In-place updates are not supported on {}", self.ns()),
                ErrorKind::InvalidOperation,
            ));
        }

        args.pre_image_recording_enabled_for_collection = self.record_pre_images();
        if args.pre_image_doc.is_none() && args.needs_pre_image() {
            args.pre_image_doc = Some(old_doc.value().clone());
        }

        let old_data = old_doc.value().to_bytes()?;
        let new_data = self
            .record_store()
            .update_with_damages(txn, id, &old_data, damage_source, damages)?;
        let updated = Document::from_bytes(&new_data)?;
        if updated.get(DOC_ID) != old_doc.value().get(DOC_ID) {
            log::error!("In-place update of {} changed the _id", self.ns());
            return Err(QuarryError::new("_id mismatch in update", ErrorKind::IdMismatch));
        }

        args.updated_doc = updated.clone();
        self.services().observer().on_update(txn, self.ns(), self.uuid(), args)?;
        Ok(updated)
    }

    /// Deletes the document stored under `id`.
    ///
    /// Capped collections refuse deletes from operations that enforce
    /// constraints. Other operations, like replicated deletes applied on a
    /// secondary, may delete from them while holding the capped deletion
    /// mutex.
    pub fn delete_document(
        &self,
        txn: &TransactionContext,
        doc: &Snapshotted<Document>,
        id: &RecordId,
        op_debug: Option<&mut OpDebug>,
        options: DeleteOptions,
    ) -> QuarryResult<()> {
        self.require_unit_of_work(txn, "delete")?;
        if self.is_capped() && txn.is_enforcing_constraints() {
            log::info!("Failing remove on a capped ns {}", self.ns());
            return Err(QuarryError::new(
                "cannot remove from a capped collection",
                ErrorKind::CannotRemoveFromCapped,
            ));
        }

        let _deleter = self.is_capped().then(|| self.shared().lock_capped_deleter());

        let observer = self.services().observer();
        observer.about_to_delete(txn, self.ns(), self.uuid(), doc.value())?;

        let record_pre_images = self.record_pre_images();
        let retryable = txn.txn_number().is_some() && options.store_deleted_doc == StoreDeletedDoc::On;
        let deleted_doc = (retryable || record_pre_images).then(|| doc.value().clone());

        let keys_deleted = self
            .indexes()
            .unindex_record(txn, doc.value(), id, !options.no_warn)?;
        self.record_store().delete_record(txn, id)?;

        let args = OplogDeleteEntryArgs {
            deleted_doc,
            from_migrate: options.from_migrate,
            pre_image_recording_enabled_for_collection: record_pre_images,
            capped_eviction: false,
        };
        observer.on_delete(txn, self.ns(), self.uuid(), options.stmt_id, &args)?;
        if let Some(op_debug) = op_debug {
            op_debug.increment_keys_deleted(keys_deleted);
        }
        Ok(())
    }

    pub fn delete_document_by_id(
        &self,
        txn: &TransactionContext,
        id: &RecordId,
        op_debug: Option<&mut OpDebug>,
        options: DeleteOptions,
    ) -> QuarryResult<()> {
        let doc = self.doc_for(txn, id)?;
        self.delete_document(txn, &doc, id, op_debug, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CollectionOptions, Namespace};
    use crate::collection::CollectionServices;
    use crate::doc;
    use crate::observer::{ObservedEvent, RecordingObserver};
    use crate::store::{InMemoryRecordStore, InMemoryRecordStoreConfig};
    use crate::transaction::OperationOptions;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        observer: Arc<RecordingObserver>,
        generation: CollectionGeneration,
    }

    fn fixture(coll: &str, options: CollectionOptions) -> Fixture {
        fixture_with_store(coll, options, InMemoryRecordStoreConfig::new())
    }

    fn fixture_with_store(coll: &str, options: CollectionOptions, config: InMemoryRecordStoreConfig) -> Fixture {
        let observer = Arc::new(RecordingObserver::new());
        let services = CollectionServices::builder().observer(observer.clone()).build();
        let ns = Namespace::new("write", coll);
        let txn = TransactionContext::new();
        let generation = CollectionGeneration::create(
            &txn,
            &services,
            &ns,
            &options,
            Arc::new(InMemoryRecordStore::with_config(coll, config)),
        )
        .unwrap();
        Fixture { observer, generation }
    }

    fn insert(generation: &CollectionGeneration, docs: Vec<Document>) -> QuarryResult<()> {
        let txn = TransactionContext::new();
        txn.unit_of_work(|txn| {
            let statements = docs.into_iter().map(InsertStatement::new).collect();
            generation.insert_documents(txn, statements, None, false)
        })
    }

    #[test]
    fn writes_need_a_unit_of_work() {
        let f = fixture("nouow", CollectionOptions::new());
        let txn = TransactionContext::new();
        let err = f
            .generation
            .insert_document(&txn, InsertStatement::new(doc! { _id: 1 }), None, false)
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn insert_indexes_and_notifies() {
        let f = fixture("insert", CollectionOptions::new());
        let txn = TransactionContext::new();
        let mut op_debug = OpDebug::new();
        txn.unit_of_work(|txn| {
            f.generation.insert_documents(
                txn,
                vec![InsertStatement::new(doc! { _id: 1 }), InsertStatement::new(doc! { _id: 2 })],
                Some(&mut op_debug),
                false,
            )
        })
        .unwrap();

        assert_eq!(op_debug.keys_inserted, 2);
        assert_eq!(f.generation.num_records(&txn), 2);
        assert!(f.generation.find_by_id(&txn, &json!(2)).unwrap().is_some());
        assert_eq!(f.observer.events().len(), 1);
    }

    #[test]
    fn insert_without_id_is_refused() {
        let f = fixture("noid", CollectionOptions::new());
        let err = insert(&f.generation, vec![doc! { name: "x" }]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::MissingId);
        assert!(f.observer.events().is_empty());
    }

    #[test]
    fn failed_batch_rolls_back() {
        let f = fixture("dup", CollectionOptions::new());
        let err = insert(&f.generation, vec![doc! { _id: 1 }, doc! { _id: 1 }]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DuplicateKey);

        let txn = TransactionContext::new();
        assert!(f.generation.is_empty(&txn).unwrap());
        assert!(f.observer.events().is_empty());
    }

    #[test]
    fn validator_applies_to_inserts() {
        let f = fixture(
            "validated",
            CollectionOptions::new().validator(doc! { qty: { "$gte": 0 } }),
        );
        let err = insert(&f.generation, vec![doc! { _id: 1, qty: (-1) }]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DocumentValidationFailure);
        assert!(err.diagnostic().is_some());
        insert(&f.generation, vec![doc! { _id: 1, qty: 3 }]).unwrap();
    }

    #[test]
    fn indexed_capped_collection_takes_one_document_at_a_time() {
        let f = fixture("capped", CollectionOptions::new().capped(4096, 0));
        let err = insert(&f.generation, vec![doc! { _id: 1 }, doc! { _id: 2 }]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::OperationCannotBeBatched);
        insert(&f.generation, vec![doc! { _id: 1 }]).unwrap();
    }

    #[test]
    fn clustered_insert_keys_records_by_id() {
        let f = fixture_with_store(
            "clustered",
            CollectionOptions::new().clustered(None),
            InMemoryRecordStoreConfig::new().key_format(crate::document::KeyFormat::String),
        );
        insert(&f.generation, vec![doc! { _id: "a", v: 1 }]).unwrap();
        let txn = TransactionContext::new();
        let (id, _) = f.generation.find_by_id(&txn, &json!("a")).unwrap().unwrap();
        assert_eq!(id, RecordId::from_id_value(&json!("a")));

        let err = insert(&f.generation, vec![doc! { v: 2 }]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::MissingId);
    }

    #[test]
    fn update_replaces_document_and_keys() {
        let f = fixture("update", CollectionOptions::new());
        insert(&f.generation, vec![doc! { _id: 1, v: 1 }]).unwrap();

        let txn = TransactionContext::new();
        txn.unit_of_work(|txn| {
            let (id, old) = f.generation.find_by_id(txn, &json!(1))?.unwrap();
            let mut args = CollectionUpdateArgs::new(doc! { "$set": { v: 2 } });
            f.generation
                .update_document(txn, &id, &old, doc! { _id: 1, v: 2 }, true, None, &mut args)?;
            assert_eq!(args.pre_image_doc, Some(doc! { _id: 1, v: 1 }));
            Ok(())
        })
        .unwrap();

        let (_, doc) = f.generation.find_by_id(&txn, &json!(1)).unwrap().unwrap();
        assert_eq!(doc.value().get("v"), Some(&json!(2)));
        assert!(matches!(
            f.observer.events().last(),
            Some(ObservedEvent::Update { pre_image: Some(_), .. })
        ));
    }

    #[test]
    fn update_may_not_change_id() {
        let f = fixture("idchange", CollectionOptions::new());
        insert(&f.generation, vec![doc! { _id: 1 }]).unwrap();

        let txn = TransactionContext::new();
        let err = txn
            .unit_of_work(|txn| {
                let (id, old) = f.generation.find_by_id(txn, &json!(1))?.unwrap();
                let mut args = CollectionUpdateArgs::new(doc! { _id: 2 });
                f.generation
                    .update_document(txn, &id, &old, doc! { _id: 2 }, true, None, &mut args)
            })
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IdMismatch);
        assert_eq!(err.code(), 13596);
    }

    #[test]
    fn update_with_stale_snapshot_is_refused() {
        let f = fixture("stale", CollectionOptions::new());
        insert(&f.generation, vec![doc! { _id: 1, v: 1 }]).unwrap();

        let txn = TransactionContext::new();
        let (id, old) = f.generation.find_by_id(&txn, &json!(1)).unwrap().unwrap();
        txn.abandon_snapshot().unwrap();
        let err = txn
            .unit_of_work(|txn| {
                let mut args = CollectionUpdateArgs::new(doc! {});
                f.generation
                    .update_document(txn, &id, &old, doc! { _id: 1, v: 2 }, false, None, &mut args)
            })
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::SnapshotMismatch);
    }

    #[test]
    fn capped_documents_keep_their_size() {
        let f = fixture("cappedsize", CollectionOptions::new().capped(4096, 0));
        insert(&f.generation, vec![doc! { _id: 1, v: "aa" }]).unwrap();

        let txn = TransactionContext::new();
        let err = txn
            .unit_of_work(|txn| {
                let (id, old) = f.generation.find_by_id(txn, &json!(1))?.unwrap();
                let mut args = CollectionUpdateArgs::new(doc! {});
                f.generation
                    .update_document(txn, &id, &old, doc! { _id: 1, v: "aaaa" }, false, None, &mut args)
            })
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::CannotGrowDocumentInCappedNamespace);

        txn.unit_of_work(|txn| {
            let (id, old) = f.generation.find_by_id(txn, &json!(1))?.unwrap();
            let mut args = CollectionUpdateArgs::new(doc! {});
            f.generation
                .update_document(txn, &id, &old, doc! { _id: 1, v: "bb" }, false, None, &mut args)
        })
        .unwrap();
    }

    #[test]
    fn damages_need_support_and_no_validator() {
        let f = fixture_with_store(
            "damages",
            CollectionOptions::new(),
            InMemoryRecordStoreConfig::new().update_in_place(true),
        );
        assert!(f.generation.update_with_damages_supported());
        insert(&f.generation, vec![doc! { _id: 1, v: "aa" }]).unwrap();

        let txn = TransactionContext::new();
        let updated = txn
            .unit_of_work(|txn| {
                let (id, old) = f.generation.find_by_id(txn, &json!(1))?.unwrap();
                let old_bytes = old.value().to_bytes()?;
                let offset = old_bytes.windows(2).position(|w| w == b"aa").unwrap_or_default();
                let mut args = CollectionUpdateArgs::new(doc! {});
                f.generation.update_document_with_damages(
                    txn,
                    &id,
                    &old,
                    b"zz",
                    &[DamageEvent::new(0, offset, 2)],
                    &mut args,
                )
            })
            .unwrap();
        assert_eq!(updated.get("v"), Some(&json!("zz")));

        let validated = fixture_with_store(
            "damages_validated",
            CollectionOptions::new().validator(doc! { v: { "$exists": true } }),
            InMemoryRecordStoreConfig::new().update_in_place(true),
        );
        assert!(!validated.generation.update_with_damages_supported());
        assert!(!fixture("damages_plain", CollectionOptions::new())
            .generation
            .update_with_damages_supported());
    }

    #[test]
    fn delete_removes_record_keys_and_notifies() {
        let f = fixture("delete", CollectionOptions::new());
        insert(&f.generation, vec![doc! { _id: 1 }]).unwrap();
        f.observer.clear();

        let txn = TransactionContext::new();
        let mut op_debug = OpDebug::new();
        txn.unit_of_work(|txn| {
            let (id, _) = f.generation.find_by_id(txn, &json!(1))?.unwrap();
            f.generation
                .delete_document_by_id(txn, &id, Some(&mut op_debug), DeleteOptions::default())
        })
        .unwrap();

        assert_eq!(op_debug.keys_deleted, 1);
        assert!(f.generation.is_empty(&txn).unwrap());
        let events = f.observer.events();
        assert!(matches!(events[0], ObservedEvent::AboutToDelete { .. }));
        assert!(matches!(events[1], ObservedEvent::Delete { deleted_doc: None, .. }));
    }

    #[test]
    fn retryable_delete_keeps_the_document() {
        let f = fixture("retryable", CollectionOptions::new());
        insert(&f.generation, vec![doc! { _id: 1 }]).unwrap();
        f.observer.clear();

        let txn = TransactionContext::with_options(OperationOptions::new().txn_number(7));
        txn.unit_of_work(|txn| {
            let (id, doc) = f.generation.find_by_id(txn, &json!(1))?.unwrap();
            let options = DeleteOptions {
                stmt_id: Some(3),
                store_deleted_doc: StoreDeletedDoc::On,
                ..Default::default()
            };
            f.generation.delete_document(txn, &doc, &id, None, options)
        })
        .unwrap();

        assert_eq!(
            f.observer.events()[1],
            ObservedEvent::Delete {
                ns: f.generation.ns().clone(),
                stmt_id: Some(3),
                deleted_doc: Some(doc! { _id: 1 }),
                capped_eviction: false,
            }
        );
    }

    #[test]
    fn capped_delete_needs_a_system_operation() {
        let f = fixture("cappeddelete", CollectionOptions::new().capped(4096, 0));
        insert(&f.generation, vec![doc! { _id: 1 }]).unwrap();

        let txn = TransactionContext::new();
        let err = txn
            .unit_of_work(|txn| {
                let (id, _) = f.generation.find_by_id(txn, &json!(1))?.unwrap();
                f.generation.delete_document_by_id(txn, &id, None, DeleteOptions::default())
            })
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::CannotRemoveFromCapped);
        assert_eq!(err.code(), 10089);

        let system = TransactionContext::with_options(OperationOptions::new().enforce_constraints(false));
        system
            .unit_of_work(|txn| {
                let (id, _) = f.generation.find_by_id(txn, &json!(1))?.unwrap();
                f.generation.delete_document_by_id(txn, &id, None, DeleteOptions::default())
            })
            .unwrap();
        assert!(f.generation.is_empty(&system).unwrap());
    }

    #[test]
    fn oplog_inserts_need_a_bare_collection() {
        let f = fixture("plain_for_oplog", CollectionOptions::new());
        let txn = TransactionContext::new();
        let err = txn
            .unit_of_work(|txn| {
                f.generation
                    .insert_documents_for_oplog(txn, vec![NewRecord::new(doc! { _id: 1 }.to_bytes()?)])
            })
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn bulk_loader_calls_back_with_record_id() {
        let f = fixture("bulk", CollectionOptions::new());
        let txn = TransactionContext::new();
        let mut seen = None;
        let id = txn
            .unit_of_work(|txn| {
                f.generation
                    .insert_document_for_bulk_loader(txn, &doc! { _id: 1 }, |id| {
                        seen = Some(id.clone());
                        Ok(())
                    })
            })
            .unwrap();
        assert_eq!(seen, Some(id.clone()));
        assert!(f.generation.find_doc(&txn, &id).unwrap().is_some());
        // keys are the bulk loader's job
        assert!(f.generation.find_by_id(&txn, &json!(1)).unwrap().is_none());
    }
}
