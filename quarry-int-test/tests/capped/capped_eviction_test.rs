use quarry::catalog::{CollectionOptions, Namespace};
use quarry::doc;
use quarry::errors::ErrorKind;
use quarry::observer::InsertStatement;
use quarry::quarry_config::EvictionPolicy;
use quarry::store::{FaultInjectingRecordStore, FaultTarget, InMemoryRecordStore, NewRecord};
use quarry::transaction::TransactionContext;
use quarry_int_test::test_util::{
    cleanup, create_test_context, ids_of, insert_one, replace_by_id, run_test,
};
use serde_json::json;
use std::sync::Arc;

#[test]
fn test_max_docs_evicts_oldest() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("events", CollectionOptions::new().capped(1 << 20, 2))?;
            let txn = TransactionContext::new();
            for id in 1..=3 {
                insert_one(&collection, &txn, doc! { _id: id, kind: "login" })?;
            }

            assert_eq!(collection.current().num_records(&txn), 2);
            assert_eq!(ids_of(&collection, &txn)?, vec![json!(2), json!(3)]);
            assert_eq!(ctx.observer().count_deletes(), 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_triggering_batch_is_never_evicted() {
    run_test(
        create_test_context,
        |ctx| {
            let ns = Namespace::new("local", "oplog.rs");
            let store = Arc::new(InMemoryRecordStore::new("oplog"));
            let collection = ctx.create_collection_in(&ns, CollectionOptions::new().capped(1 << 20, 2), store)?;
            let txn = TransactionContext::new();

            let mut batch = Vec::new();
            for ts in 1..=3 {
                batch.push(NewRecord::new(doc! { ts: ts, op: "n" }.to_bytes()?));
            }
            let ids = txn.unit_of_work(|txn| {
                collection.write(txn, |generation| generation.insert_documents_for_oplog(txn, batch))
            })?;
            assert_eq!(ids.len(), 3);
            assert_eq!(collection.current().num_records(&txn), 3);

            let next = vec![NewRecord::new(doc! { ts: 4, op: "n" }.to_bytes()?)];
            txn.unit_of_work(|txn| {
                collection.write(txn, |generation| generation.insert_documents_for_oplog(txn, next))
            })?;
            assert_eq!(collection.current().num_records(&txn), 2);
            assert!(collection.current().find_doc(&txn, &ids[0])?.is_none());
            assert!(collection.current().find_doc(&txn, &ids[1])?.is_none());
            assert!(collection.current().find_doc(&txn, &ids[2])?.is_some());

            // the oplog is not replicated, so evictions are not logged
            assert_eq!(ctx.observer().count_deletes(), 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_rollback_clears_resume_point() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("resume", CollectionOptions::new().capped(1 << 20, 2))?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1 })?;
            insert_one(&collection, &txn, doc! { _id: 2 })?;
            let shared = collection.current().shared().clone();
            assert!(shared.capped_first_record().is_none());

            txn.begin_unit_of_work();
            collection.write(&txn, |generation| {
                generation.insert_document(&txn, InsertStatement::new(doc! { _id: 3 }), None, false)
            })?;
            assert!(shared.capped_first_record().is_some());
            txn.abort_unit_of_work();

            assert!(shared.capped_first_record().is_none());
            assert_eq!(ids_of(&collection, &txn)?, vec![json!(1), json!(2)]);

            // the next eviction starts again from the oldest live record
            insert_one(&collection, &txn, doc! { _id: 4 })?;
            assert_eq!(ids_of(&collection, &txn)?, vec![json!(2), json!(4)]);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_update_cannot_change_document_size() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("sized", CollectionOptions::new().capped(1 << 20, 0))?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1, v: "a" })?;

            let err = replace_by_id(&collection, &txn, json!(1), doc! { _id: 1, v: "abc" }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::CannotGrowDocumentInCappedNamespace);
            assert_eq!(err.code(), 10003);

            replace_by_id(&collection, &txn, json!(1), doc! { _id: 1, v: "b" })?;
            let (_, doc) = collection.current().find_by_id(&txn, &json!(1))?.expect("document is still there");
            assert_eq!(doc.value().get("v"), Some(&json!("b")));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_independent_eviction_ignores_write_conflicts() {
    run_test(
        create_test_context,
        |ctx| {
            ctx.config().set_eviction_policy(EvictionPolicy::Independent);
            let ns = ctx.ns("independent");
            let store = Arc::new(FaultInjectingRecordStore::new(Arc::new(InMemoryRecordStore::new(&ns.ns()))));
            let collection = ctx.create_collection_in(&ns, CollectionOptions::new().capped(1 << 20, 1), store.clone())?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1 })?;

            store.fail_next(FaultTarget::Delete, 1);
            insert_one(&collection, &txn, doc! { _id: 2 })?;
            assert_eq!(store.remaining(FaultTarget::Delete), 0);
            assert_eq!(ids_of(&collection, &txn)?, vec![json!(1), json!(2)]);

            // the next insert catches up
            insert_one(&collection, &txn, doc! { _id: 3 })?;
            assert_eq!(ids_of(&collection, &txn)?, vec![json!(3)]);
            assert_eq!(ctx.observer().count_deletes(), 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_integrated_eviction_propagates_write_conflicts() {
    run_test(
        create_test_context,
        |ctx| {
            let ns = ctx.ns("integrated");
            let store = Arc::new(FaultInjectingRecordStore::new(Arc::new(InMemoryRecordStore::new(&ns.ns()))));
            let collection = ctx.create_collection_in(&ns, CollectionOptions::new().capped(1 << 20, 1), store.clone())?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1 })?;

            store.fail_next(FaultTarget::Delete, 1);
            let err = insert_one(&collection, &txn, doc! { _id: 2 }).unwrap_err();
            assert!(err.is_write_conflict());
            assert_eq!(ids_of(&collection, &txn)?, vec![json!(1)]);
            Ok(())
        },
        cleanup,
    )
}
