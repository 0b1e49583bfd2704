use quarry::catalog::CollectionOptions;
use quarry::collection::{DeleteOptions, OpDebug, VersionedCollection};
use quarry::doc;
use quarry::errors::{ErrorKind, QuarryResult};
use quarry::index::ID_INDEX_NAME;
use quarry::observer::{ObservedEvent, StoreDeletedDoc};
use quarry::transaction::{OperationOptions, TransactionContext};
use quarry_int_test::test_util::{cleanup, create_test_context, ids_of, insert_one, run_test};
use serde_json::{json, Value};

fn delete_by_id(
    collection: &VersionedCollection,
    txn: &TransactionContext,
    id: Value,
    op_debug: Option<&mut OpDebug>,
    options: DeleteOptions,
) -> QuarryResult<()> {
    txn.unit_of_work(|txn| {
        collection.write(txn, |generation| {
            let (record_id, doc) = generation
                .find_by_id(txn, &id)?
                .expect("document to delete exists");
            generation.delete_document(txn, &doc, &record_id, op_debug, options)
        })
    })
}

fn deletes(events: Vec<ObservedEvent>) -> Vec<ObservedEvent> {
    events
        .into_iter()
        .filter(|event| matches!(event, ObservedEvent::Delete { .. }))
        .collect()
}

#[test]
fn test_delete_removes_record_and_keys() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("removed", CollectionOptions::new())?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1 })?;
            insert_one(&collection, &txn, doc! { _id: 2 })?;

            let mut op_debug = OpDebug::new();
            delete_by_id(&collection, &txn, json!(1), Some(&mut op_debug), DeleteOptions::default())?;

            assert_eq!(op_debug.keys_deleted, 1);
            assert_eq!(ids_of(&collection, &txn)?, vec![json!(2)]);
            assert!(collection.current().indexes().lookup(ID_INDEX_NAME, &json!(1))?.is_empty());
            assert_eq!(
                deletes(ctx.observer().events()),
                vec![ObservedEvent::Delete {
                    ns: ctx.ns("removed"),
                    stmt_id: None,
                    deleted_doc: None,
                    capped_eviction: false,
                }]
            );
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_retryable_delete_keeps_deleted_document() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("retried", CollectionOptions::new())?;
            let txn = TransactionContext::with_options(OperationOptions::new().txn_number(7));
            insert_one(&collection, &txn, doc! { _id: 1, v: "kept" })?;

            let options = DeleteOptions {
                stmt_id: Some(3),
                store_deleted_doc: StoreDeletedDoc::On,
                ..Default::default()
            };
            delete_by_id(&collection, &txn, json!(1), None, options)?;

            assert_eq!(
                deletes(ctx.observer().events()),
                vec![ObservedEvent::Delete {
                    ns: ctx.ns("retried"),
                    stmt_id: Some(3),
                    deleted_doc: Some(doc! { _id: 1, v: "kept" }),
                    capped_eviction: false,
                }]
            );
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_deleted_document_needs_transaction_number() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("plain", CollectionOptions::new())?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1 })?;

            let options = DeleteOptions {
                store_deleted_doc: StoreDeletedDoc::On,
                ..Default::default()
            };
            delete_by_id(&collection, &txn, json!(1), None, options)?;

            match deletes(ctx.observer().events()).as_slice() {
                [ObservedEvent::Delete { deleted_doc, .. }] => assert!(deleted_doc.is_none()),
                other => panic!("unexpected events {:?}", other),
            }
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_capped_delete_is_refused() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("ring", CollectionOptions::new().capped(1 << 20, 0))?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1 })?;

            let err = delete_by_id(&collection, &txn, json!(1), None, DeleteOptions::default()).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::CannotRemoveFromCapped);
            assert_eq!(err.code(), 10089);
            assert_eq!(ids_of(&collection, &txn)?, vec![json!(1)]);

            // replicated deletes do not enforce constraints
            let applier = TransactionContext::with_options(OperationOptions::new().enforce_constraints(false));
            delete_by_id(&collection, &applier, json!(1), None, DeleteOptions::default())?;
            assert!(collection.current().is_empty(&txn)?);
            Ok(())
        },
        cleanup,
    )
}
