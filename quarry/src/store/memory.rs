use crossbeam_skiplist::SkipMap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::Bound::{Excluded, Included, Unbounded};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use crate::document::{apply_damages, DamageEvent, KeyFormat, RecordId};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::store::{CappedCallback, NewRecord, Record, RecordCursor, RecordStore};
use crate::transaction::TransactionContext;

/// Configuration of an [`InMemoryRecordStore`].
#[derive(Debug, Clone)]
pub struct InMemoryRecordStoreConfig {
    key_format: KeyFormat,
    update_in_place: bool,
    self_managed_oplog_truncation: bool,
}

impl Default for InMemoryRecordStoreConfig {
    fn default() -> Self {
        InMemoryRecordStoreConfig {
            key_format: KeyFormat::Long,
            update_in_place: false,
            self_managed_oplog_truncation: false,
        }
    }
}

impl InMemoryRecordStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_format(mut self, key_format: KeyFormat) -> Self {
        self.key_format = key_format;
        self
    }

    pub fn update_in_place(mut self, supported: bool) -> Self {
        self.update_in_place = supported;
        self
    }

    pub fn self_managed_oplog_truncation(mut self, enabled: bool) -> Self {
        self.self_managed_oplog_truncation = enabled;
        self
    }
}

/// Record store kept entirely in memory.
///
/// Records live in a concurrent skip list, so cursors see a consistent key
/// order while other threads write. Every write claims its record for the
/// writing transaction until that transaction's unit of work ends; a second
/// transaction touching a claimed record gets a write conflict. Writes register
/// their own undo with the transaction.
#[derive(Clone)]
pub struct InMemoryRecordStore {
    inner: Arc<InMemoryRecordStoreInner>,
}

impl InMemoryRecordStore {
    pub fn new(ident: &str) -> Self {
        Self::with_config(ident, InMemoryRecordStoreConfig::default())
    }

    pub fn with_config(ident: &str, config: InMemoryRecordStoreConfig) -> Self {
        InMemoryRecordStore {
            inner: Arc::new(InMemoryRecordStoreInner {
                ident: ident.to_string(),
                config,
                records: SkipMap::new(),
                data_size: AtomicI64::new(0),
                num_records: AtomicI64::new(0),
                next_id: AtomicI64::new(1),
                owners: DashMap::new(),
                capped_callback: RwLock::new(None),
            }),
        }
    }

    fn claim(&self, txn: &TransactionContext, id: &RecordId) -> QuarryResult<()> {
        let owner = txn.id();
        let newly_claimed = match self.inner.owners.entry(id.clone()) {
            Entry::Occupied(entry) => {
                if *entry.get() != owner {
                    log::debug!(
                        "Txn {} conflicts with txn {} on {} in {}",
                        owner,
                        entry.get(),
                        id,
                        self.inner.ident
                    );
                    return Err(write_conflict());
                }
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(owner);
                true
            }
        };

        if newly_claimed {
            let on_rollback = (self.inner.clone(), id.clone());
            let on_commit = (self.inner.clone(), id.clone());
            txn.on_rollback(move || on_rollback.0.release(&on_rollback.1, owner));
            txn.on_commit(move |_| on_commit.0.release(&on_commit.1, owner));
        }
        Ok(())
    }

    fn next_id(&self, requested: Option<RecordId>) -> QuarryResult<RecordId> {
        let id = match (requested, self.inner.config.key_format) {
            (Some(id), _) => id,
            (None, KeyFormat::Long) => {
                RecordId::Long(self.inner.next_id.fetch_add(1, Ordering::SeqCst))
            }
            (None, KeyFormat::String) => {
                log::error!("Record store {} requires caller supplied ids", self.inner.ident);
                return Err(QuarryError::new(
                    "Clustered record store requires caller supplied record ids",
                    ErrorKind::InvalidOperation,
                ));
            }
        };

        if id.key_format() != self.inner.config.key_format {
            log::error!("{} does not match the key format of {}", id, self.inner.ident);
            return Err(QuarryError::new(
                &format!("{} does not match the key format of the record store", id),
                ErrorKind::InvalidOperation,
            ));
        }
        if let Some(value) = id.as_long() {
            self.inner.next_id.fetch_max(value + 1, Ordering::SeqCst);
        }
        Ok(id)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn ident(&self) -> &str {
        &self.inner.ident
    }

    fn key_format(&self) -> KeyFormat {
        self.inner.config.key_format
    }

    fn insert_records(
        &self,
        txn: &TransactionContext,
        records: Vec<NewRecord>,
    ) -> QuarryResult<Vec<RecordId>> {
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id = self.next_id(record.id)?;
            self.claim(txn, &id)?;
            if self.inner.records.contains_key(&id) {
                log::error!("Duplicate {} in {}", id, self.inner.ident);
                return Err(QuarryError::new(
                    &format!("E11000 duplicate key error collection: {} key: {}", self.inner.ident, id),
                    ErrorKind::DuplicateKey,
                ));
            }

            self.inner.put(id.clone(), Arc::new(record.data));
            let inner = self.inner.clone();
            let undo_id = id.clone();
            txn.on_rollback(move || {
                inner.remove(&undo_id);
            });
            ids.push(id);
        }
        Ok(ids)
    }

    fn update_record(&self, txn: &TransactionContext, id: &RecordId, data: &[u8]) -> QuarryResult<()> {
        self.claim(txn, id)?;
        let old = self.inner.get(id).ok_or_else(|| record_not_found(id))?;
        self.inner.put(id.clone(), Arc::new(data.to_vec()));

        let inner = self.inner.clone();
        let undo_id = id.clone();
        txn.on_rollback(move || inner.put(undo_id, old));
        Ok(())
    }

    fn update_with_damages_supported(&self) -> bool {
        self.inner.config.update_in_place
    }

    fn update_with_damages(
        &self,
        txn: &TransactionContext,
        id: &RecordId,
        _old_data: &[u8],
        damage_source: &[u8],
        damages: &[DamageEvent],
    ) -> QuarryResult<Vec<u8>> {
        if !self.inner.config.update_in_place {
            log::error!("Record store {} does not update in place", self.inner.ident);
            return Err(QuarryError::new(
                "Record store does not support in-place updates",
                ErrorKind::InvalidOperation,
            ));
        }

        self.claim(txn, id)?;
        let old = self.inner.get(id).ok_or_else(|| record_not_found(id))?;
        let patched = apply_damages(&old, damage_source, damages)?;
        self.inner.put(id.clone(), Arc::new(patched.clone()));

        let inner = self.inner.clone();
        let undo_id = id.clone();
        txn.on_rollback(move || inner.put(undo_id, old));
        Ok(patched)
    }

    fn delete_record(&self, txn: &TransactionContext, id: &RecordId) -> QuarryResult<()> {
        self.claim(txn, id)?;
        let old = self.inner.remove(id).ok_or_else(|| record_not_found(id))?;

        let inner = self.inner.clone();
        let undo_id = id.clone();
        txn.on_rollback(move || inner.put(undo_id, old));
        Ok(())
    }

    fn find_record(&self, _txn: &TransactionContext, id: &RecordId) -> QuarryResult<Option<Vec<u8>>> {
        Ok(self.inner.get(id).map(|data| data.to_vec()))
    }

    fn cursor(&self, _txn: &TransactionContext, forward: bool) -> QuarryResult<Box<dyn RecordCursor>> {
        Ok(Box::new(InMemoryCursor {
            inner: self.inner.clone(),
            forward,
            position: None,
        }))
    }

    fn data_size(&self, _txn: &TransactionContext) -> i64 {
        self.inner.data_size.load(Ordering::SeqCst)
    }

    fn num_records(&self, _txn: &TransactionContext) -> i64 {
        self.inner.num_records.load(Ordering::SeqCst)
    }

    fn truncate(&self, txn: &TransactionContext) -> QuarryResult<()> {
        let ids: Vec<RecordId> = self.inner.records.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            self.claim(txn, id)?;
        }

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(data) = self.inner.remove(&id) {
                removed.push((id, data));
            }
        }
        log::debug!("Truncated {} records from {}", removed.len(), self.inner.ident);

        let inner = self.inner.clone();
        txn.on_rollback(move || {
            for (id, data) in removed {
                inner.put(id, data);
            }
        });
        Ok(())
    }

    fn capped_truncate_after(
        &self,
        txn: &TransactionContext,
        end: &RecordId,
        inclusive: bool,
    ) -> QuarryResult<()> {
        let lower = if inclusive { Included(end) } else { Excluded(end) };
        let victims: Vec<(RecordId, Arc<Vec<u8>>)> = self
            .inner
            .records
            .range((lower, Unbounded))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let callback = self.inner.capped_callback.read().as_ref().and_then(Weak::upgrade);
        for (id, data) in victims {
            if let Some(callback) = &callback {
                callback.about_to_delete_capped(txn, &id, &data)?;
            }
            self.delete_record(txn, &id)?;
        }
        Ok(())
    }

    fn set_capped_callback(&self, callback: Option<Weak<dyn CappedCallback>>) {
        *self.inner.capped_callback.write() = callback;
    }

    fn self_managed_oplog_truncation(&self) -> bool {
        self.inner.config.self_managed_oplog_truncation
    }
}

struct InMemoryRecordStoreInner {
    ident: String,
    config: InMemoryRecordStoreConfig,
    records: SkipMap<RecordId, Arc<Vec<u8>>>,
    data_size: AtomicI64,
    num_records: AtomicI64,
    next_id: AtomicI64,
    owners: DashMap<RecordId, u64>,
    capped_callback: RwLock<Option<Weak<dyn CappedCallback>>>,
}

impl InMemoryRecordStoreInner {
    fn get(&self, id: &RecordId) -> Option<Arc<Vec<u8>>> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    // keeps the size and count in step with the map
    fn put(&self, id: RecordId, data: Arc<Vec<u8>>) {
        let added = data.len() as i64;
        let replaced = self.records.get(&id).map(|entry| entry.value().len() as i64);
        self.records.insert(id, data);
        match replaced {
            Some(old) => {
                self.data_size.fetch_add(added - old, Ordering::SeqCst);
            }
            None => {
                self.data_size.fetch_add(added, Ordering::SeqCst);
                self.num_records.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn remove(&self, id: &RecordId) -> Option<Arc<Vec<u8>>> {
        let entry = self.records.remove(id)?;
        let data = entry.value().clone();
        self.data_size.fetch_sub(data.len() as i64, Ordering::SeqCst);
        self.num_records.fetch_sub(1, Ordering::SeqCst);
        Some(data)
    }

    fn release(&self, id: &RecordId, owner: u64) {
        self.owners.remove_if(id, |_, current| *current == owner);
    }
}

struct InMemoryCursor {
    inner: Arc<InMemoryRecordStoreInner>,
    forward: bool,
    position: Option<RecordId>,
}

impl RecordCursor for InMemoryCursor {
    fn next(&mut self) -> QuarryResult<Option<Record>> {
        let records = &self.inner.records;
        let entry = match (&self.position, self.forward) {
            (None, true) => records.front(),
            (None, false) => records.back(),
            (Some(position), true) => records.range((Excluded(position), Unbounded)).next(),
            (Some(position), false) => records.range((Unbounded, Excluded(position))).next_back(),
        };

        Ok(entry.map(|entry| {
            self.position = Some(entry.key().clone());
            Record {
                id: entry.key().clone(),
                data: entry.value().to_vec(),
            }
        }))
    }

    fn seek_exact(&mut self, id: &RecordId) -> QuarryResult<Option<Record>> {
        Ok(self.inner.records.get(id).map(|entry| {
            self.position = Some(id.clone());
            Record {
                id: id.clone(),
                data: entry.value().to_vec(),
            }
        }))
    }
}

pub(crate) fn write_conflict() -> QuarryError {
    QuarryError::new(
        "WriteConflict error: this operation conflicted with another operation. \
         Please retry your operation or multi-document transaction.",
        ErrorKind::WriteConflict,
    )
}

fn record_not_found(id: &RecordId) -> QuarryError {
    log::error!("{} not found", id);
    QuarryError::new(&format!("{} not found", id), ErrorKind::NotFound)
}
