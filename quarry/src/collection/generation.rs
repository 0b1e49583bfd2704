use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::{CatalogEntry, CatalogId, CollectionOptions, Namespace, TimeseriesOptions};
use crate::collection::{CappedInsertNotifier, CollectionServices, SharedState};
use crate::common::{atomic, Atomic, Decorations, ReadExecutor, Timestamp, WriteExecutor};
use crate::document::{Document, KeyFormat, RecordId, DOC_ID};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::index::{IndexCatalog, IndexCoordinator, IndexSpec, IndexedRecord, ID_INDEX_NAME};
use crate::store::{RecordCursor, RecordStore};
use crate::transaction::{Snapshotted, TransactionContext};
use crate::validation::{
    check_validator_can_be_used_on_ns, ValidationAction, ValidationLevel, ValidationState, Validator,
};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_generation_id() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::SeqCst)
}

/// One catalog version of a collection.
///
/// A generation is an immutable-by-convention view of the collection's
/// metadata (validator, index definitions, flags) on top of the
/// [`SharedState`] every generation of the collection shares. Readers clone
/// the handle and keep using it for as long as they like. Catalog changes are
/// made on a fresh copy (see [`CollectionGeneration::clone_for_ddl`]) under
/// the exclusive collection lock, so readers of the old copy are unaffected.
#[derive(Clone)]
pub struct CollectionGeneration {
    pub(crate) inner: Arc<GenerationInner>,
}

pub(crate) struct GenerationInner {
    pub(crate) id: u64,
    pub(crate) ns: Namespace,
    pub(crate) catalog_id: CatalogId,
    pub(crate) uuid: Uuid,
    pub(crate) clustered: bool,
    pub(crate) timeseries: Option<TimeseriesOptions>,
    pub(crate) shared: SharedState,
    pub(crate) services: CollectionServices,
    pub(crate) indexes: Box<dyn IndexCoordinator>,
    pub(crate) meta: Atomic<GenerationMeta>,
}

#[derive(Clone)]
pub(crate) struct GenerationMeta {
    pub(crate) validation: ValidationState,
    pub(crate) record_pre_images: bool,
    pub(crate) cached_committed: bool,
    pub(crate) min_visible_snapshot: Option<Timestamp>,
}

impl GenerationInner {
    pub(crate) fn indexes(&self) -> &dyn IndexCoordinator {
        self.indexes.as_ref()
    }
}

impl Drop for GenerationInner {
    fn drop(&mut self) {
        self.shared.retire_generation(self.id);
    }
}

impl CollectionGeneration {
    /// Creates a new, empty collection: registers it in the durable catalog,
    /// sets up its shared state and builds the `_id` index when the
    /// collection needs one. The collection counts as committed once the
    /// caller's unit of work commits.
    pub fn create(
        txn: &TransactionContext,
        services: &CollectionServices,
        ns: &Namespace,
        options: &CollectionOptions,
        record_store: Arc<dyn RecordStore>,
    ) -> QuarryResult<CollectionGeneration> {
        options.validate()?;
        check_validator_can_be_used_on_ns(&options.validator, ns)?;
        check_key_format(ns, options, record_store.as_ref())?;

        let catalog_id = services.durable_catalog().create_collection(txn, ns, options)?;
        let entry = services.durable_catalog().get_entry(catalog_id)?;
        let generation = Self::assemble(services, catalog_id, &entry, record_store, false)?;

        if generation.requires_id_index() {
            generation.create_index_on_empty_collection(txn, IndexSpec::id_index())?;
        }

        let shared = generation.shared().clone();
        txn.on_commit(move |_| shared.store_committed(true));
        log::debug!("Created collection {} ({})", ns, generation.uuid());
        Ok(generation)
    }

    /// Opens a collection the durable catalog already knows, rebuilding the
    /// keys of its indexes from the records in `record_store`.
    pub fn attach(
        txn: &TransactionContext,
        services: &CollectionServices,
        catalog_id: CatalogId,
        record_store: Arc<dyn RecordStore>,
    ) -> QuarryResult<CollectionGeneration> {
        let entry = services.durable_catalog().get_entry(catalog_id)?;
        check_key_format(&entry.ns, &entry.options, record_store.as_ref())?;
        let generation = Self::assemble(services, catalog_id, &entry, record_store, true)?;

        for spec in &entry.indexes {
            generation.inner.indexes.create_index_on_empty_collection(txn, spec.clone())?;
        }
        if !entry.indexes.is_empty() {
            let mut records = Vec::new();
            let mut cursor = generation.cursor(txn, true)?;
            while let Some(record) = cursor.next()? {
                records.push((record.id, Document::from_bytes(&record.data)?));
            }
            let indexed: Vec<IndexedRecord<'_>> = records
                .iter()
                .map(|(id, doc)| IndexedRecord::new(id, 0, doc))
                .collect();
            generation.inner.indexes.index_records(txn, &indexed)?;
        }

        log::debug!("Attached collection {} with {} indexes", entry.ns, entry.indexes.len());
        Ok(generation)
    }

    fn assemble(
        services: &CollectionServices,
        catalog_id: CatalogId,
        entry: &CatalogEntry,
        record_store: Arc<dyn RecordStore>,
        committed: bool,
    ) -> QuarryResult<CollectionGeneration> {
        let options = &entry.options;
        let uuid = options.uuid.ok_or_else(|| {
            log::error!("Catalog entry {} of {} has no uuid", catalog_id, entry.ns);
            QuarryError::new(
                &format!("Catalog entry {} has no uuid", catalog_id),
                ErrorKind::InternalError,
            )
        })?;

        let shared = SharedState::new(&entry.ns, options, record_store);
        shared.store_committed(committed);

        let validator = Validator::parse(
            services.compiler().as_ref(),
            &entry.ns,
            &options.validator,
            options.validation_level,
            options.validation_action,
            services.config().validator_feature_ceiling(),
        );

        let inner = Arc::new(GenerationInner {
            id: next_generation_id(),
            ns: entry.ns.clone(),
            catalog_id,
            uuid,
            clustered: options.clustered.is_some(),
            timeseries: options.timeseries.clone(),
            shared: shared.clone(),
            services: services.clone(),
            indexes: Box::new(IndexCatalog::new()),
            meta: atomic(GenerationMeta {
                validation: ValidationState::new(
                    validator,
                    options.validation_level,
                    options.validation_action,
                ),
                record_pre_images: options.record_pre_images,
                cached_committed: false,
                min_visible_snapshot: None,
            }),
        });

        let guard = shared.collection_lock().lock_exclusive();
        shared.install_new_generation(inner.id, Arc::downgrade(&inner), &guard)?;
        Ok(CollectionGeneration { inner })
    }

    /// Generation number, unique within the process.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn ns(&self) -> &Namespace {
        &self.inner.ns
    }

    pub fn catalog_id(&self) -> CatalogId {
        self.inner.catalog_id
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    pub fn shared(&self) -> &SharedState {
        &self.inner.shared
    }

    pub fn services(&self) -> &CollectionServices {
        &self.inner.services
    }

    pub fn indexes(&self) -> &dyn IndexCoordinator {
        self.inner.indexes()
    }

    pub fn record_store(&self) -> &Arc<dyn RecordStore> {
        self.inner.shared.record_store()
    }

    pub fn decorations(&self) -> &Decorations {
        self.inner.shared.decorations()
    }

    pub fn is_capped(&self) -> bool {
        self.inner.shared.is_capped()
    }

    pub fn capped_max_docs(&self) -> i64 {
        self.inner.shared.capped_max_docs()
    }

    pub fn capped_max_size(&self) -> i64 {
        self.inner.shared.capped_max_size()
    }

    pub fn is_clustered(&self) -> bool {
        self.inner.clustered
    }

    pub fn timeseries_options(&self) -> Option<&TimeseriesOptions> {
        self.inner.timeseries.as_ref()
    }

    pub fn default_collation(&self) -> &Document {
        self.inner.shared.collation()
    }

    pub fn record_pre_images(&self) -> bool {
        self.inner.meta.read_with(|meta| meta.record_pre_images)
    }

    pub fn validation(&self) -> ValidationState {
        self.inner.meta.read_with(|meta| meta.validation.clone())
    }

    pub fn validator(&self) -> Validator {
        self.inner.meta.read_with(|meta| meta.validation.validator.clone())
    }

    pub fn validation_level(&self) -> ValidationLevel {
        self.inner.meta.read_with(|meta| meta.validation.level())
    }

    pub fn validation_action(&self) -> ValidationAction {
        self.inner.meta.read_with(|meta| meta.validation.action())
    }

    pub fn capped_insert_notifier(&self) -> Option<Arc<CappedInsertNotifier>> {
        self.inner.shared.capped_insert_notifier()
    }

    /// Checks `doc` against the validator of this generation.
    pub fn check_validation(&self, txn: &TransactionContext, doc: &Document) -> QuarryResult<()> {
        self.validation().check_document(txn, self.ns(), doc)
    }

    pub fn is_committed(&self) -> bool {
        self.inner.meta.read_with(|meta| meta.cached_committed) || self.inner.shared.is_committed()
    }

    /// Flips the committed state. Setting the state it already has is a bug
    /// in the caller.
    pub fn set_committed(&self, committed: bool) -> QuarryResult<()> {
        if self.is_committed() == committed {
            log::error!("Collection {} is already committed={}", self.ns(), committed);
            return Err(QuarryError::new(
                &format!("Collection {} is already committed={}", self.ns(), committed),
                ErrorKind::InternalError,
            ));
        }

        if committed {
            // false to true goes through the shared flag so every generation sees it
            self.inner.shared.store_committed(true);
        } else {
            self.inner.meta.write_with(|meta| meta.cached_committed = false);
            self.inner.shared.store_committed(false);
        }
        Ok(())
    }

    pub fn minimum_visible_snapshot(&self) -> Option<Timestamp> {
        self.inner.meta.read_with(|meta| meta.min_visible_snapshot)
    }

    /// Raises the oldest snapshot that may read this generation. Never lowers it.
    pub fn set_minimum_visible_snapshot(&self, snapshot: Timestamp) {
        self.inner.meta.write_with(|meta| {
            if meta.min_visible_snapshot.map(|current| snapshot > current).unwrap_or(true) {
                meta.min_visible_snapshot = Some(snapshot);
            }
        });
    }

    /// The oplog, clustered collections and a few legacy system collections
    /// have no `_id` index.
    pub fn requires_id_index(&self) -> bool {
        let ns = self.ns();
        if ns.is_oplog() || self.is_clustered() {
            return false;
        }
        !(ns.is_system_dot_indexes() || ns.is_system_dot_namespaces() || ns.is_system_dot_profile())
    }

    pub fn get_index_size(&self) -> u64 {
        self.indexes().space_used_bytes()
    }

    pub fn cursor(&self, txn: &TransactionContext, forward: bool) -> QuarryResult<Box<dyn RecordCursor>> {
        self.record_store().cursor(txn, forward)
    }

    /// The document stored under `id`, tagged with the reading snapshot.
    pub fn find_doc(&self, txn: &TransactionContext, id: &RecordId) -> QuarryResult<Option<Snapshotted<Document>>> {
        match self.record_store().find_record(txn, id)? {
            Some(data) => {
                let doc = Document::from_bytes(&data)?;
                Ok(Some(Snapshotted::new(txn.snapshot_id(), doc)))
            }
            None => Ok(None),
        }
    }

    pub fn doc_for(&self, txn: &TransactionContext, id: &RecordId) -> QuarryResult<Snapshotted<Document>> {
        self.find_doc(txn, id)?.ok_or_else(|| {
            QuarryError::new(
                &format!("{} not found in {}", id, self.ns()),
                ErrorKind::NotFound,
            )
        })
    }

    /// Looks a document up by its `_id` value and returns its record id too.
    pub fn find_by_id(
        &self,
        txn: &TransactionContext,
        id_value: &Value,
    ) -> QuarryResult<Option<(RecordId, Snapshotted<Document>)>> {
        if self.is_clustered() {
            let id = RecordId::from_id_value(id_value);
            return Ok(self.find_doc(txn, &id)?.map(|doc| (id, doc)));
        }

        if self.indexes().find_id_index().is_some() {
            for id in self.indexes().lookup(ID_INDEX_NAME, id_value)? {
                if let Some(doc) = self.find_doc(txn, &id)? {
                    return Ok(Some((id, doc)));
                }
            }
            return Ok(None);
        }

        let mut cursor = self.cursor(txn, true)?;
        while let Some(record) = cursor.next()? {
            let doc = Document::from_bytes(&record.data)?;
            if doc.get(DOC_ID) == Some(id_value) {
                return Ok(Some((record.id, Snapshotted::new(txn.snapshot_id(), doc))));
            }
        }
        Ok(None)
    }

    pub fn num_records(&self, txn: &TransactionContext) -> i64 {
        self.record_store().num_records(txn)
    }

    pub fn data_size(&self, txn: &TransactionContext) -> i64 {
        self.record_store().data_size(txn)
    }

    /// Probes with a cursor; the fast count is only compared for diagnostics.
    pub fn is_empty(&self, txn: &TransactionContext) -> QuarryResult<bool> {
        let cursor_empty = self.cursor(txn, true)?.next()?.is_none();
        let fast_count = self.num_records(txn);
        if cursor_empty != (fast_count == 0) {
            log::debug!(
                "Detected erroneous fast count for collection {} ({}) [{}]: fastCount {}, cursor {}",
                self.ns(),
                self.uuid(),
                self.record_store().ident(),
                fast_count,
                if cursor_empty { "0" } else { ">=1" }
            );
        }
        Ok(cursor_empty)
    }
}

impl Debug for CollectionGeneration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionGeneration")
            .field("id", &self.inner.id)
            .field("ns", &self.inner.ns)
            .field("uuid", &self.inner.uuid)
            .field("capped", &self.is_capped())
            .finish()
    }
}

fn check_key_format(ns: &Namespace, options: &CollectionOptions, store: &dyn RecordStore) -> QuarryResult<()> {
    let expected = if options.clustered.is_some() {
        KeyFormat::String
    } else {
        KeyFormat::Long
    };
    if store.key_format() != expected {
        log::error!("Record store {} has the wrong key format for {}", store.ident(), ns);
        return Err(QuarryError::new(
            &format!(
                "Record store {} uses {:?} keys but {} needs {:?} keys",
                store.ident(),
                store.key_format(),
                ns,
                expected
            ),
            ErrorKind::InvalidOptions,
        ));
    }
    Ok(())
}
