use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use uuid::Uuid;

use crate::catalog::Namespace;
use crate::common::{atomic, Atomic, ReadExecutor, StmtId, WriteExecutor};
use crate::document::Document;
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::observer::{CollectionUpdateArgs, InsertStatement, LogObserver, OplogDeleteEntryArgs};
use crate::transaction::TransactionContext;

/// An event seen by a [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    Inserts {
        ns: Namespace,
        docs: Vec<Document>,
    },
    Update {
        ns: Namespace,
        updated: Document,
        pre_image: Option<Document>,
    },
    AboutToDelete {
        ns: Namespace,
        doc: Document,
    },
    Delete {
        ns: Namespace,
        stmt_id: Option<StmtId>,
        deleted_doc: Option<Document>,
        capped_eviction: bool,
    },
}

/// Observer that keeps the events of committed and in-flight units of work.
/// Events of a unit of work that rolls back are dropped again.
#[derive(Default)]
pub struct RecordingObserver {
    events: Atomic<Vec<(u64, ObservedEvent)>>,
    seq: AtomicU64,
    failures: AtomicU32,
}

impl RecordingObserver {
    pub fn new() -> Self {
        RecordingObserver {
            events: atomic(Vec::new()),
            seq: AtomicU64::new(0),
            failures: AtomicU32::new(0),
        }
    }

    /// Makes the next `times` callbacks fail.
    pub fn fail_next(&self, times: u32) {
        self.failures.store(times, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events
            .read_with(|events| events.iter().map(|(_, event)| event.clone()).collect())
    }

    pub fn clear(&self) {
        self.events.write_with(|events| events.clear());
    }

    pub fn count_deletes(&self) -> usize {
        self.events
            .read_with(|events| {
                events
                    .iter()
                    .filter(|(_, event)| matches!(event, ObservedEvent::Delete { .. }))
                    .count()
            })
    }

    fn record(&self, txn: &TransactionContext, event: ObservedEvent) -> QuarryResult<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            log::error!("Injected log observer failure");
            return Err(QuarryError::new(
                "Injected log observer failure",
                ErrorKind::FailPointEnabled,
            ));
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.events.write_with(|events| events.push((seq, event)));

        let events = self.events.clone();
        txn.on_rollback(move || {
            events.write_with(|events| events.retain(|(s, _)| *s != seq));
        });
        Ok(())
    }
}

impl LogObserver for RecordingObserver {
    fn on_inserts(
        &self,
        txn: &TransactionContext,
        ns: &Namespace,
        _uuid: Uuid,
        statements: &[InsertStatement],
        _from_migrate: bool,
    ) -> QuarryResult<()> {
        self.record(
            txn,
            ObservedEvent::Inserts {
                ns: ns.clone(),
                docs: statements.iter().map(|s| s.doc.clone()).collect(),
            },
        )
    }

    fn on_update(
        &self,
        txn: &TransactionContext,
        ns: &Namespace,
        _uuid: Uuid,
        args: &CollectionUpdateArgs,
    ) -> QuarryResult<()> {
        self.record(
            txn,
            ObservedEvent::Update {
                ns: ns.clone(),
                updated: args.updated_doc.clone(),
                pre_image: args.pre_image_doc.clone(),
            },
        )
    }

    fn about_to_delete(
        &self,
        txn: &TransactionContext,
        ns: &Namespace,
        _uuid: Uuid,
        doc: &Document,
    ) -> QuarryResult<()> {
        self.record(
            txn,
            ObservedEvent::AboutToDelete {
                ns: ns.clone(),
                doc: doc.clone(),
            },
        )
    }

    fn on_delete(
        &self,
        txn: &TransactionContext,
        ns: &Namespace,
        _uuid: Uuid,
        stmt_id: Option<StmtId>,
        args: &OplogDeleteEntryArgs,
    ) -> QuarryResult<()> {
        self.record(
            txn,
            ObservedEvent::Delete {
                ns: ns.clone(),
                stmt_id,
                deleted_doc: args.deleted_doc.clone(),
                capped_eviction: args.capped_eviction,
            },
        )
    }
}
