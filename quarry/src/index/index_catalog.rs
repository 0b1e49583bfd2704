use im::{OrdMap, OrdSet, Vector};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

use crate::common::{atomic, Atomic, ReadExecutor, WriteExecutor};
use crate::document::{Document, RecordId};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::index::{IndexCoordinator, IndexSpec, IndexedRecord};
use crate::transaction::TransactionContext;

/// Key table of one index definition. Generations that carry the same
/// definition share the table.
struct IndexEntry {
    spec: IndexSpec,
    keys: RwLock<OrdMap<String, OrdSet<RecordId>>>,
}

impl IndexEntry {
    fn new(spec: IndexSpec) -> Self {
        IndexEntry {
            spec,
            keys: RwLock::new(OrdMap::new()),
        }
    }

    fn key_of(&self, doc: &Document) -> String {
        encode_key(doc.get_path(&self.spec.key))
    }

    fn insert_key(self: &Arc<Self>, txn: &TransactionContext, key: String, id: &RecordId) -> QuarryResult<()> {
        {
            let mut keys = self.keys.write();
            let mut ids = keys.get(&key).cloned().unwrap_or_default();
            if self.spec.unique && !ids.is_empty() && !ids.contains(id) {
                log::error!("Duplicate key {} in index {}", key, self.spec.name);
                return Err(QuarryError::new(
                    &format!(
                        "E11000 duplicate key error index: {} dup key: {{ {}: {} }}",
                        self.spec.name, self.spec.key, key
                    ),
                    ErrorKind::DuplicateKey,
                ));
            }
            if ids.insert(id.clone()).is_some() {
                return Ok(());
            }
            keys.insert(key.clone(), ids);
        }

        let entry = self.clone();
        let id = id.clone();
        txn.on_rollback(move || {
            entry.detach(&key, &id);
        });
        Ok(())
    }

    fn remove_key(self: &Arc<Self>, txn: &TransactionContext, key: String, id: &RecordId) -> bool {
        if !self.detach(&key, id) {
            return false;
        }
        let entry = self.clone();
        let id = id.clone();
        txn.on_rollback(move || entry.attach(key, id));
        true
    }

    fn attach(&self, key: String, id: RecordId) {
        let mut keys = self.keys.write();
        let mut ids = keys.get(&key).cloned().unwrap_or_default();
        ids.insert(id);
        keys.insert(key, ids);
    }

    fn detach(&self, key: &str, id: &RecordId) -> bool {
        let mut keys = self.keys.write();
        let Some(mut ids) = keys.get(key).cloned() else {
            return false;
        };
        if ids.remove(id).is_none() {
            return false;
        }
        if ids.is_empty() {
            keys.remove(key);
        } else {
            keys.insert(key.to_string(), ids);
        }
        true
    }

    fn lookup(&self, key: &str) -> Vec<RecordId> {
        self.keys
            .read()
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn space_used_bytes(&self) -> u64 {
        self.keys
            .read()
            .iter()
            .map(|(key, ids)| (key.len() * ids.len().max(1)) as u64)
            .sum()
    }
}

#[derive(Clone)]
struct IndexSlot {
    entry: Arc<IndexEntry>,
    ready: bool,
}

/// Index definitions of one collection generation.
///
/// Cloning for a new generation copies the slot list (a persistent vector, so
/// the copy is cheap) and shares every key table with the old generation.
/// Unfinished builds receive writes like ready indexes.
pub struct IndexCatalog {
    slots: Atomic<Vector<IndexSlot>>,
}

impl IndexCatalog {
    pub fn new() -> Self {
        IndexCatalog {
            slots: atomic(Vector::new()),
        }
    }

    fn entries(&self) -> Vec<Arc<IndexEntry>> {
        self.slots
            .read_with(|slots| slots.iter().map(|slot| slot.entry.clone()).collect())
    }

    fn entry(&self, name: &str) -> Option<Arc<IndexEntry>> {
        self.slots.read_with(|slots| {
            slots
                .iter()
                .find(|slot| slot.entry.spec.name == name)
                .map(|slot| slot.entry.clone())
        })
    }

    fn remember_for_rollback(&self, txn: &TransactionContext) {
        let before = self.slots.read().clone();
        let slots = self.slots.clone();
        txn.on_rollback(move || slots.write_with(|current| *current = before));
    }

    fn add_slot(&self, txn: &TransactionContext, spec: IndexSpec, ready: bool) -> QuarryResult<()> {
        if self.entry(&spec.name).is_some() {
            log::error!("Index {} already exists", spec.name);
            return Err(QuarryError::new(
                &format!("Index {} already exists", spec.name),
                ErrorKind::IndexingError,
            ));
        }
        self.remember_for_rollback(txn);
        self.slots.write_with(|slots| {
            slots.push_back(IndexSlot {
                entry: Arc::new(IndexEntry::new(spec)),
                ready,
            })
        });
        Ok(())
    }
}

impl Default for IndexCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexCoordinator for IndexCatalog {
    fn clone_for_generation(&self) -> Box<dyn IndexCoordinator> {
        Box::new(IndexCatalog {
            slots: atomic(self.slots.read().clone()),
        })
    }

    fn find_id_index(&self) -> Option<IndexSpec> {
        self.slots.read_with(|slots| {
            slots
                .iter()
                .find(|slot| slot.ready && slot.entry.spec.is_id_index())
                .map(|slot| slot.entry.spec.clone())
        })
    }

    fn find_index(&self, name: &str) -> Option<IndexSpec> {
        self.entry(name).map(|entry| entry.spec.clone())
    }

    fn num_indexes_total(&self) -> usize {
        self.slots.read_with(|slots| slots.len())
    }

    fn num_indexes_ready(&self) -> usize {
        self.slots
            .read_with(|slots| slots.iter().filter(|slot| slot.ready).count())
    }

    fn specs(&self) -> Vec<IndexSpec> {
        self.entries().into_iter().map(|entry| entry.spec.clone()).collect()
    }

    fn index_records(&self, txn: &TransactionContext, records: &[IndexedRecord<'_>]) -> QuarryResult<i64> {
        let mut inserted = 0;
        for entry in self.entries() {
            for record in records {
                entry.insert_key(txn, entry.key_of(record.doc), record.id)?;
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn unindex_record(
        &self,
        txn: &TransactionContext,
        doc: &Document,
        id: &RecordId,
        log_if_error: bool,
    ) -> QuarryResult<i64> {
        let mut deleted = 0;
        for entry in self.entries() {
            let key = entry.key_of(doc);
            if entry.remove_key(txn, key.clone(), id) {
                deleted += 1;
            } else if log_if_error {
                log::warn!(
                    "Unindex of {} from {} found no key {}",
                    id,
                    entry.spec.name,
                    key
                );
            }
        }
        Ok(deleted)
    }

    fn update_record(
        &self,
        txn: &TransactionContext,
        old: &Document,
        new: &Document,
        id: &RecordId,
    ) -> QuarryResult<(i64, i64)> {
        let (mut inserted, mut deleted) = (0, 0);
        for entry in self.entries() {
            let old_key = entry.key_of(old);
            let new_key = entry.key_of(new);
            if old_key == new_key {
                continue;
            }
            if entry.remove_key(txn, old_key, id) {
                deleted += 1;
            }
            entry.insert_key(txn, new_key, id)?;
            inserted += 1;
        }
        Ok((inserted, deleted))
    }

    fn lookup(&self, index_name: &str, key: &Value) -> QuarryResult<Vec<RecordId>> {
        match self.entry(index_name) {
            Some(entry) => Ok(entry.lookup(&encode_key(Some(key)))),
            None => Err(QuarryError::new(
                &format!("Index {} not found", index_name),
                ErrorKind::NotFound,
            )),
        }
    }

    fn create_index_on_empty_collection(&self, txn: &TransactionContext, spec: IndexSpec) -> QuarryResult<()> {
        self.add_slot(txn, spec, true)
    }

    fn begin_index_build(&self, txn: &TransactionContext, spec: IndexSpec) -> QuarryResult<()> {
        self.add_slot(txn, spec, false)
    }

    fn index_build_success(&self, txn: &TransactionContext, index_name: &str) -> QuarryResult<()> {
        let position = self.slots.read_with(|slots| {
            slots
                .iter()
                .position(|slot| slot.entry.spec.name == index_name && !slot.ready)
        });
        let Some(position) = position else {
            log::error!("No unfinished build of index {}", index_name);
            return Err(QuarryError::new(
                &format!("No unfinished build of index {}", index_name),
                ErrorKind::IndexingError,
            ));
        };

        self.remember_for_rollback(txn);
        self.slots.write_with(|slots| {
            if let Some(slot) = slots.get_mut(position) {
                slot.ready = true;
            }
        });
        Ok(())
    }

    fn drop_all_indexes(&self, txn: &TransactionContext, include_id_index: bool) -> QuarryResult<()> {
        self.remember_for_rollback(txn);
        self.slots.write_with(|slots| {
            slots.retain(|slot| !include_id_index && slot.entry.spec.is_id_index())
        });
        Ok(())
    }

    fn space_used_bytes(&self) -> u64 {
        self.entries().iter().map(|entry| entry.space_used_bytes()).sum()
    }
}

// missing fields index as null
fn encode_key(value: Option<&Value>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => Value::Null.to_string(),
    }
}
