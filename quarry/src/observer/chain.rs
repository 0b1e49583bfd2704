use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::Namespace;
use crate::common::StmtId;
use crate::document::Document;
use crate::errors::QuarryResult;
use crate::observer::{CollectionUpdateArgs, InsertStatement, LogObserver, OplogDeleteEntryArgs};
use crate::transaction::TransactionContext;

/// Fans every event out to its observers in registration order, stopping at
/// the first failure.
#[derive(Clone, Default)]
pub struct ObserverChain {
    observers: Vec<Arc<dyn LogObserver>>,
}

impl ObserverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn LogObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl LogObserver for ObserverChain {
    fn on_inserts(
        &self,
        txn: &TransactionContext,
        ns: &Namespace,
        uuid: Uuid,
        statements: &[InsertStatement],
        from_migrate: bool,
    ) -> QuarryResult<()> {
        for observer in &self.observers {
            observer.on_inserts(txn, ns, uuid, statements, from_migrate)?;
        }
        Ok(())
    }

    fn on_update(
        &self,
        txn: &TransactionContext,
        ns: &Namespace,
        uuid: Uuid,
        args: &CollectionUpdateArgs,
    ) -> QuarryResult<()> {
        for observer in &self.observers {
            observer.on_update(txn, ns, uuid, args)?;
        }
        Ok(())
    }

    fn about_to_delete(
        &self,
        txn: &TransactionContext,
        ns: &Namespace,
        uuid: Uuid,
        doc: &Document,
    ) -> QuarryResult<()> {
        for observer in &self.observers {
            observer.about_to_delete(txn, ns, uuid, doc)?;
        }
        Ok(())
    }

    fn on_delete(
        &self,
        txn: &TransactionContext,
        ns: &Namespace,
        uuid: Uuid,
        stmt_id: Option<StmtId>,
        args: &OplogDeleteEntryArgs,
    ) -> QuarryResult<()> {
        for observer in &self.observers {
            observer.on_delete(txn, ns, uuid, stmt_id, args)?;
        }
        Ok(())
    }
}
