use crate::collection::CollectionGeneration;
use crate::document::{Document, RecordId};
use crate::errors::QuarryResult;
use crate::observer::OplogDeleteEntryArgs;
use crate::quarry_config::EvictionPolicy;
use crate::transaction::TransactionContext;

impl CollectionGeneration {
    /// True when the collection is over its size or document cap.
    pub(crate) fn capped_and_need_delete(&self, txn: &TransactionContext) -> bool {
        if !self.is_capped() {
            return false;
        }
        if self.ns().is_oplog() && self.record_store().self_managed_oplog_truncation() {
            return false;
        }
        if self.data_size(txn) > self.capped_max_size() {
            return true;
        }
        let max_docs = self.capped_max_docs();
        max_docs != 0 && self.num_records(txn) > max_docs
    }

    /// Evicts the oldest documents until the collection is back under its
    /// caps. Records in `just_inserted` are never evicted.
    pub(crate) fn capped_delete_as_needed(&self, txn: &TransactionContext, just_inserted: &[RecordId]) -> QuarryResult<()> {
        let policy = self.services().config().eviction_policy();
        if policy == EvictionPolicy::Integrated && !txn.is_enforcing_constraints() {
            // replicated deletes remove the documents on this node
            return Ok(());
        }
        if !self.capped_and_need_delete(txn) {
            return Ok(());
        }

        match policy {
            EvictionPolicy::Integrated => self.evict_capped(txn, just_inserted, true),
            EvictionPolicy::Independent => {
                match txn.run_side_transaction(|side| self.evict_capped(side, just_inserted, false)) {
                    Err(err) if err.is_write_conflict() => {
                        log::info!("Got write conflict removing capped records, ignoring");
                        Ok(())
                    }
                    result => result,
                }
            }
        }
    }

    fn evict_capped(&self, txn: &TransactionContext, just_inserted: &[RecordId], notify_observer: bool) -> QuarryResult<()> {
        let shared = self.shared();
        let mut deleter = shared.lock_capped_deleter();

        let data_size = self.data_size(txn);
        let max_size = self.capped_max_size();
        let size_over_cap = if data_size > max_size { data_size - max_size } else { 0 };
        let num_records = self.num_records(txn);
        let max_docs = self.capped_max_docs();
        let docs_over_cap = if max_docs != 0 && num_records > max_docs {
            num_records - max_docs
        } else {
            0
        };

        let mut cursor = self.cursor(txn, true)?;
        let mut record = match &deleter.first_record {
            Some(first) => match cursor.seek_exact(first)? {
                Some(record) => Some(record),
                None => {
                    log::debug!("Capped resume point {} of {} is gone, starting over", first, self.ns());
                    cursor = self.cursor(txn, true)?;
                    cursor.next()?
                }
            },
            None => cursor.next()?,
        };

        let notify_observer = notify_observer && self.ns().is_replicated();
        let record_pre_images = self.record_pre_images();
        let observer = self.services().observer();
        let (mut size_saved, mut docs_removed) = (0i64, 0i64);

        while size_saved < size_over_cap || docs_removed < docs_over_cap {
            let Some(current) = record.take() else {
                break;
            };
            if just_inserted.contains(&current.id) {
                // never evict what the triggering write inserted
                record = Some(current);
                break;
            }

            docs_removed += 1;
            size_saved += current.data.len() as i64;
            let doc = Document::from_bytes(&current.data)?;

            if notify_observer {
                observer.about_to_delete(txn, self.ns(), self.uuid(), &doc)?;
                let args = OplogDeleteEntryArgs {
                    deleted_doc: record_pre_images.then(|| doc.clone()),
                    from_migrate: false,
                    pre_image_recording_enabled_for_collection: record_pre_images,
                    capped_eviction: true,
                };
                observer.on_delete(txn, self.ns(), self.uuid(), None, &args)?;
            }

            self.indexes().unindex_record(txn, &doc, &current.id, false)?;
            // the cursor moves off the record before it goes away
            record = cursor.next()?;
            self.record_store().delete_record(txn, &current.id)?;
        }

        deleter.first_record = record.map(|record| record.id);
        drop(deleter);

        let rollback_state = shared.clone();
        txn.on_rollback(move || rollback_state.clear_capped_first_record());

        log::debug!(
            "Evicted {} documents ({} bytes) from capped collection {}",
            docs_removed,
            size_saved,
            self.ns()
        );
        Ok(())
    }
}
