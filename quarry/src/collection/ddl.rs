use std::sync::Arc;

use crate::collection::generation::{next_generation_id, GenerationInner, GenerationMeta};
use crate::collection::CollectionGeneration;
use crate::common::{atomic, ExclusiveCollectionGuard, ReadExecutor, WriteExecutor};
use crate::document::{Document, RecordId};
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::index::IndexSpec;
use crate::quarry_config::ClusterRole;
use crate::transaction::TransactionContext;
use crate::validation::{ValidationAction, ValidationLevel, ValidationState, Validator};

impl CollectionGeneration {
    /// Copies this generation for a catalog change and installs the copy as
    /// the latest generation of the collection.
    ///
    /// The copy shares the record store and the index key tables; the index
    /// definitions and the metadata are its own. Dropping the copy without
    /// publishing it makes this generation the latest again.
    pub fn clone_for_ddl(&self, guard: &ExclusiveCollectionGuard) -> QuarryResult<CollectionGeneration> {
        let committed = self.is_committed();
        let meta = self.inner.meta.read_with(|meta| GenerationMeta {
            cached_committed: committed,
            ..meta.clone()
        });

        let inner = Arc::new(GenerationInner {
            id: next_generation_id(),
            ns: self.inner.ns.clone(),
            catalog_id: self.inner.catalog_id,
            uuid: self.inner.uuid,
            clustered: self.inner.clustered,
            timeseries: self.inner.timeseries.clone(),
            shared: self.inner.shared.clone(),
            services: self.inner.services.clone(),
            indexes: self.inner.indexes.clone_for_generation(),
            meta: atomic(meta),
        });

        self.inner
            .shared
            .install_new_generation(inner.id, Arc::downgrade(&inner), guard)?;
        log::debug!(
            "Cloned generation {} of {} into {}",
            self.inner.id,
            self.inner.ns,
            inner.id
        );
        Ok(CollectionGeneration { inner })
    }

    // restores the metadata if the unit of work rolls back
    fn update_meta(&self, txn: &TransactionContext, update: impl FnOnce(&mut GenerationMeta)) {
        let before = self.inner.meta.read().clone();
        self.inner.meta.write_with(update);
        let meta = self.inner.meta.clone();
        txn.on_rollback(move || meta.write_with(|current| *current = before));
    }

    fn parse_validator(
        &self,
        spec: &Document,
        level: Option<ValidationLevel>,
        action: Option<ValidationAction>,
    ) -> Validator {
        let services = self.services();
        Validator::parse(
            services.compiler().as_ref(),
            self.ns(),
            spec,
            level,
            action,
            services.config().validator_feature_ceiling(),
        )
    }

    fn install_validation(&self, txn: &TransactionContext, state: ValidationState) -> QuarryResult<()> {
        self.services().durable_catalog().update_validator(
            txn,
            self.catalog_id(),
            state.validator.spec(),
            state.level,
            state.action,
        )?;
        self.update_meta(txn, |meta| meta.validation = state);
        Ok(())
    }

    /// Replaces the validator. Fails without changing anything when the new
    /// validator does not compile.
    pub fn set_validator(&self, txn: &TransactionContext, spec: Document) -> QuarryResult<()> {
        let current = self.validation();
        let validator = self.parse_validator(&spec, current.level, current.action);
        if let Some(err) = validator.error() {
            return Err(err.clone());
        }
        self.install_validation(txn, ValidationState::new(validator, current.level, current.action))
    }

    /// Changes the validation level, re-checking the validator against the
    /// features the new level allows.
    pub fn set_validation_level(&self, txn: &TransactionContext, level: ValidationLevel) -> QuarryResult<()> {
        let current = self.validation();
        let validator = self.parse_validator(current.validator.spec(), Some(level), current.action);
        if let Some(err) = validator.error() {
            return Err(err.clone());
        }
        self.install_validation(txn, ValidationState::new(validator, Some(level), current.action))
    }

    /// Changes the validation action, re-checking the validator against the
    /// features the new action allows.
    pub fn set_validation_action(&self, txn: &TransactionContext, action: ValidationAction) -> QuarryResult<()> {
        let current = self.validation();
        let validator = self.parse_validator(current.validator.spec(), current.level, Some(action));
        if let Some(err) = validator.error() {
            return Err(err.clone());
        }
        self.install_validation(txn, ValidationState::new(validator, current.level, Some(action)))
    }

    /// Replaces validator, level and action at once. A validator that does not
    /// compile is stored anyway; writes report its error.
    pub fn update_validator(
        &self,
        txn: &TransactionContext,
        spec: Document,
        level: Option<ValidationLevel>,
        action: Option<ValidationAction>,
    ) -> QuarryResult<()> {
        let validator = self.parse_validator(&spec, level, action);
        if let Some(err) = validator.error() {
            log::warn!("Storing malformed validator on {}: {}", self.ns(), err);
        }
        self.install_validation(txn, ValidationState::new(validator, level, action))
    }

    pub fn update_capped_size(&self, txn: &TransactionContext, new_size: i64) -> QuarryResult<()> {
        if !self.is_capped() {
            log::error!("Cannot update size on non-capped collection {}", self.ns());
            return Err(QuarryError::new(
                &format!("Cannot update size on a non-capped collection {}", self.ns()),
                ErrorKind::InvalidNamespace,
            ));
        }
        if new_size <= 0 {
            return Err(QuarryError::new(
                "capped collections need a positive size",
                ErrorKind::InvalidOptions,
            ));
        }

        if self.ns().is_oplog() {
            self.record_store().update_oplog_size(new_size)?;
        }
        self.services()
            .durable_catalog()
            .update_capped_size(txn, self.catalog_id(), new_size)?;

        let shared = self.shared().clone();
        let before = shared.capped_max_size();
        shared.set_capped_max_size(new_size);
        txn.on_rollback(move || shared.set_capped_max_size(before));
        Ok(())
    }

    pub fn set_record_pre_images(&self, txn: &TransactionContext, enabled: bool) -> QuarryResult<()> {
        if enabled {
            let role = self.services().config().cluster_role();
            if role != ClusterRole::None {
                let place = match role {
                    ClusterRole::Shard => "shards",
                    _ => "config servers",
                };
                return Err(QuarryError::new(
                    &format!("recordPreImages config option is not supported on {}", place),
                    ErrorKind::InvalidOptions,
                ));
            }
            let db = self.ns().db();
            if db == "admin" || db == "local" {
                return Err(QuarryError::new(
                    &format!("recordPreImages collection option is not supported on the {} database", db),
                    ErrorKind::InvalidOptions,
                ));
            }
        }

        self.services()
            .durable_catalog()
            .set_record_pre_images(txn, self.catalog_id(), enabled)?;
        self.update_meta(txn, |meta| meta.record_pre_images = enabled);
        Ok(())
    }

    /// Removes every document. Ready indexes are recreated empty.
    pub fn truncate(&self, txn: &TransactionContext) -> QuarryResult<()> {
        let indexes = self.indexes();
        if indexes.num_indexes_in_progress() > 0 {
            log::error!("Cannot truncate {} while indexes are being built", self.ns());
            return Err(QuarryError::new(
                &format!("Cannot truncate {} while indexes are being built", self.ns()),
                ErrorKind::InvalidOperation,
            ));
        }

        let specs: Vec<IndexSpec> = indexes.specs();
        indexes.drop_all_indexes(txn, true)?;
        self.record_store().truncate(txn)?;
        for spec in specs {
            indexes.create_index_on_empty_collection(txn, spec)?;
        }
        self.reset_capped_first_record(txn);
        Ok(())
    }

    /// Removes every document after `end`, and `end` itself when `inclusive`.
    pub fn capped_truncate_after(&self, txn: &TransactionContext, end: &RecordId, inclusive: bool) -> QuarryResult<()> {
        if !self.is_capped() {
            log::error!("capped_truncate_after on non-capped collection {}", self.ns());
            return Err(QuarryError::new(
                &format!("Collection {} is not capped", self.ns()),
                ErrorKind::InvalidOperation,
            ));
        }
        self.record_store().capped_truncate_after(txn, end, inclusive)?;
        self.reset_capped_first_record(txn);
        Ok(())
    }

    // the resume point may name a record that is gone now
    fn reset_capped_first_record(&self, txn: &TransactionContext) {
        if !self.is_capped() {
            return;
        }
        let before = self.shared().capped_first_record();
        self.shared().clear_capped_first_record();
        let shared = self.shared().clone();
        txn.on_rollback(move || shared.lock_capped_deleter().first_record = before);
    }

    pub fn create_index_on_empty_collection(&self, txn: &TransactionContext, spec: IndexSpec) -> QuarryResult<()> {
        if !self.is_empty(txn)? {
            log::error!("Cannot create index {} on non-empty collection {}", spec.name, self.ns());
            return Err(QuarryError::new(
                &format!("Collection {} is not empty", self.ns()),
                ErrorKind::InvalidOperation,
            ));
        }
        self.indexes().create_index_on_empty_collection(txn, spec.clone())?;
        self.services()
            .durable_catalog()
            .add_index(txn, self.catalog_id(), &spec)
    }

    /// Registers an index whose keys are being built. Writes maintain it
    /// from now on, but lookups only use it once the build succeeds.
    pub fn begin_index_build(&self, txn: &TransactionContext, spec: IndexSpec) -> QuarryResult<()> {
        self.indexes().begin_index_build(txn, spec)
    }

    pub fn index_build_success(&self, txn: &TransactionContext, index_name: &str) -> QuarryResult<()> {
        self.indexes().index_build_success(txn, index_name)?;
        match self.indexes().find_index(index_name) {
            Some(spec) => self
                .services()
                .durable_catalog()
                .add_index(txn, self.catalog_id(), &spec),
            None => Err(QuarryError::new(
                &format!("Index {} vanished after its build", index_name),
                ErrorKind::InternalError,
            )),
        }
    }
}
