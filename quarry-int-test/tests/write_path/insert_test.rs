use quarry::catalog::CollectionOptions;
use quarry::collection::OpDebug;
use quarry::common::{fail_point, FAIL_AFTER_BULK_LOAD_DOC_INSERT, FAIL_COLLECTION_INSERTS};
use quarry::doc;
use quarry::document::{KeyFormat, RecordId};
use quarry::errors::ErrorKind;
use quarry::index::ID_INDEX_NAME;
use quarry::observer::{InsertStatement, ObservedEvent};
use quarry::store::{InMemoryRecordStore, InMemoryRecordStoreConfig};
use quarry::transaction::TransactionContext;
use quarry_int_test::test_util::{cleanup, create_test_context, ids_of, insert_batch, insert_one, run_test};
use serde_json::json;
use std::sync::Arc;

#[test]
fn test_insert_requires_id() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("users", CollectionOptions::new())?;
            let txn = TransactionContext::new();

            let err = insert_one(&collection, &txn, doc! { name: "anonymous" }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::MissingId);
            assert!(collection.current().is_empty(&txn)?);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_insert_outside_unit_of_work() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("loose", CollectionOptions::new())?;
            let txn = TransactionContext::new();

            let err = collection
                .current()
                .insert_document(&txn, InsertStatement::new(doc! { _id: 1 }), None, false)
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_insert_counts_index_keys() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("counted", CollectionOptions::new())?;
            let txn = TransactionContext::new();
            let mut op_debug = OpDebug::new();

            txn.unit_of_work(|txn| {
                collection.write(txn, |generation| {
                    let statements = vec![
                        InsertStatement::new(doc! { _id: 1 }),
                        InsertStatement::new(doc! { _id: 2 }),
                    ];
                    generation.insert_documents(txn, statements, Some(&mut op_debug), false)
                })
            })?;

            assert_eq!(op_debug.keys_inserted, 2);
            assert!(collection.current().get_index_size() > 0);
            assert_eq!(
                ctx.observer().events(),
                vec![ObservedEvent::Inserts {
                    ns: ctx.ns("counted"),
                    docs: vec![doc! { _id: 1 }, doc! { _id: 2 }],
                }]
            );
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_fail_collection_inserts_targets_namespace() {
    run_test(
        create_test_context,
        |ctx| {
            let target = ctx.create_collection("target", CollectionOptions::new())?;
            let bystander = ctx.create_collection("bystander", CollectionOptions::new())?;
            let txn = TransactionContext::new();

            let err = {
                let _guard = fail_point(FAIL_COLLECTION_INSERTS)
                    .scoped(json!({ "collectionNS": ctx.ns("target").ns() }));
                insert_one(&bystander, &txn, doc! { _id: 1 })?;
                insert_one(&target, &txn, doc! { _id: 1 }).unwrap_err()
            };
            assert_eq!(err.kind(), &ErrorKind::FailPointEnabled);
            assert!(target.current().is_empty(&txn)?);

            insert_one(&target, &txn, doc! { _id: 1 })?;
            assert_eq!(ids_of(&target, &txn)?, vec![json!(1)]);
            assert_eq!(ids_of(&bystander, &txn)?, vec![json!(1)]);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_observer_failure_rolls_back_insert() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("observed", CollectionOptions::new())?;
            let txn = TransactionContext::new();

            ctx.observer().fail_next(1);
            let err = insert_one(&collection, &txn, doc! { _id: 1 }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::FailPointEnabled);
            assert!(collection.current().is_empty(&txn)?);
            assert!(collection.current().indexes().lookup(ID_INDEX_NAME, &json!(1))?.is_empty());
            assert!(ctx.observer().events().is_empty());

            insert_one(&collection, &txn, doc! { _id: 1 })?;
            assert_eq!(collection.current().indexes().lookup(ID_INDEX_NAME, &json!(1))?.len(), 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_capped_indexed_batch_is_refused() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("batched", CollectionOptions::new().capped(1 << 20, 0))?;
            let txn = TransactionContext::new();

            let err = insert_batch(&collection, &txn, vec![doc! { _id: 1 }, doc! { _id: 2 }]).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::OperationCannotBeBatched);
            assert_eq!(err.code(), 261);

            insert_batch(&collection, &txn, vec![doc! { _id: 1 }])?;
            assert_eq!(collection.current().num_records(&txn), 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_bulk_loader_insert() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("bulk", CollectionOptions::new())?;
            let txn = TransactionContext::new();

            let mut seen = None;
            let id = txn.unit_of_work(|txn| {
                collection.write(txn, |generation| {
                    generation.insert_document_for_bulk_loader(txn, &doc! { _id: 1 }, |id| {
                        seen = Some(id.clone());
                        Ok(())
                    })
                })
            })?;
            assert_eq!(seen, Some(id));
            // the loader builds index keys itself
            assert!(collection.current().indexes().lookup(ID_INDEX_NAME, &json!(1))?.is_empty());
            assert_eq!(ids_of(&collection, &txn)?, vec![json!(1)]);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_bulk_loader_fail_point_raises_write_conflict() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("conflicted", CollectionOptions::new())?;
            let txn = TransactionContext::new();
            let _guard = fail_point(FAIL_AFTER_BULK_LOAD_DOC_INSERT)
                .scoped(json!({ "collectionNS": ctx.ns("conflicted").ns() }));

            let err = txn
                .unit_of_work(|txn| {
                    collection.write(txn, |generation| {
                        generation.insert_document_for_bulk_loader(txn, &doc! { _id: 1 }, |_| Ok(()))
                    })
                })
                .unwrap_err();
            assert!(err.is_write_conflict());
            assert!(collection.current().is_empty(&txn)?);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_clustered_collection_keys_records_by_id() {
    run_test(
        create_test_context,
        |ctx| {
            let ns = ctx.ns("clustered");
            let store = Arc::new(InMemoryRecordStore::with_config(
                &ns.ns(),
                InMemoryRecordStoreConfig::new().key_format(KeyFormat::String),
            ));
            let collection = ctx.create_collection_in(&ns, CollectionOptions::new().clustered(None), store)?;
            assert!(collection.current().is_clustered());
            assert!(!collection.current().requires_id_index());

            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: "b" })?;
            insert_one(&collection, &txn, doc! { _id: "a" })?;

            let (record_id, _) = collection
                .current()
                .find_by_id(&txn, &json!("a"))?
                .expect("clustered lookup by _id");
            assert_eq!(record_id, RecordId::from_id_value(&json!("a")));

            let err = insert_one(&collection, &txn, doc! { v: 1 }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::MissingId);
            Ok(())
        },
        cleanup,
    )
}
