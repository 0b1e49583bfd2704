use quarry::catalog::CollectionOptions;
use quarry::collection::OpDebug;
use quarry::doc;
use quarry::document::DamageEvent;
use quarry::errors::ErrorKind;
use quarry::index::IndexSpec;
use quarry::observer::{CollectionUpdateArgs, ObservedEvent};
use quarry::store::{InMemoryRecordStore, InMemoryRecordStoreConfig};
use quarry::transaction::TransactionContext;
use quarry_int_test::test_util::{cleanup, create_test_context, insert_one, replace_by_id, run_test};
use serde_json::json;
use std::sync::Arc;

#[test]
fn test_update_cannot_change_id() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("renamed", CollectionOptions::new())?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1, v: "a" })?;

            let err = replace_by_id(&collection, &txn, json!(1), doc! { _id: 2, v: "a" }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::IdMismatch);
            assert_eq!(err.code(), 13596);
            assert!(collection.current().find_by_id(&txn, &json!(2))?.is_none());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_update_moves_index_keys() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("moved", CollectionOptions::new())?;
            let txn = TransactionContext::new();
            txn.unit_of_work(|txn| {
                collection.modify(txn, |generation| {
                    generation.create_index_on_empty_collection(txn, IndexSpec::new("v_1", "v"))
                })
            })?;
            insert_one(&collection, &txn, doc! { _id: 1, v: "a" })?;

            let mut op_debug = OpDebug::new();
            txn.unit_of_work(|txn| {
                collection.write(txn, |generation| {
                    let (id, old) = generation
                        .find_by_id(txn, &json!(1))?
                        .expect("document inserted above");
                    let new_doc = doc! { _id: 1, v: "b" };
                    let mut args = CollectionUpdateArgs::new(new_doc.clone());
                    generation.update_document(txn, &id, &old, new_doc, true, Some(&mut op_debug), &mut args)
                })
            })?;

            assert_eq!(op_debug, OpDebug { keys_inserted: 1, keys_deleted: 1 });
            let generation = collection.current();
            assert!(generation.indexes().lookup("v_1", &json!("a"))?.is_empty());
            assert_eq!(generation.indexes().lookup("v_1", &json!("b"))?.len(), 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_update_reports_pre_image() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("imaged", CollectionOptions::new().record_pre_images(true))?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1, v: 1 })?;
            ctx.observer().clear();

            replace_by_id(&collection, &txn, json!(1), doc! { _id: 1, v: 2 })?;
            assert_eq!(
                ctx.observer().events(),
                vec![ObservedEvent::Update {
                    ns: ctx.ns("imaged"),
                    updated: doc! { _id: 1, v: 2 },
                    pre_image: Some(doc! { _id: 1, v: 1 }),
                }]
            );
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_update_from_stale_snapshot_is_refused() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("stale", CollectionOptions::new())?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1, v: 1 })?;

            let (id, old) = collection
                .current()
                .find_by_id(&txn, &json!(1))?
                .expect("document inserted above");
            // committing moves the transaction to a new snapshot
            txn.unit_of_work(|_| Ok(()))?;

            let err = txn
                .unit_of_work(|txn| {
                    collection.write(txn, |generation| {
                        let new_doc = doc! { _id: 1, v: 2 };
                        let mut args = CollectionUpdateArgs::new(new_doc.clone());
                        generation.update_document(txn, &id, &old, new_doc, false, None, &mut args)
                    })
                })
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::SnapshotMismatch);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_update_with_damages() {
    run_test(
        create_test_context,
        |ctx| {
            let ns = ctx.ns("patched");
            let store = Arc::new(InMemoryRecordStore::with_config(
                &ns.ns(),
                InMemoryRecordStoreConfig::new().update_in_place(true),
            ));
            let collection = ctx.create_collection_in(&ns, CollectionOptions::new(), store)?;
            assert!(collection.current().update_with_damages_supported());

            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1, v: "aaa" })?;

            let updated = txn.unit_of_work(|txn| {
                collection.write(txn, |generation| {
                    let (id, old) = generation
                        .find_by_id(txn, &json!(1))?
                        .expect("document inserted above");
                    let bytes = old.value().to_bytes()?;
                    let offset = bytes
                        .windows(3)
                        .position(|window| window == b"aaa")
                        .expect("value is stored verbatim");
                    let mut args = CollectionUpdateArgs::new(doc! {});
                    generation.update_document_with_damages(
                        txn,
                        &id,
                        &old,
                        b"bbb",
                        &[DamageEvent::new(0, offset, 3)],
                        &mut args,
                    )
                })
            })?;

            assert_eq!(updated, doc! { _id: 1, v: "bbb" });
            let (_, stored) = collection
                .current()
                .find_by_id(&txn, &json!(1))?
                .expect("document is still there");
            assert_eq!(stored.value(), &updated);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_damages_cannot_change_id() {
    run_test(
        create_test_context,
        |ctx| {
            let ns = ctx.ns("patched_id");
            let store = Arc::new(InMemoryRecordStore::with_config(
                &ns.ns(),
                InMemoryRecordStoreConfig::new().update_in_place(true),
            ));
            let collection = ctx.create_collection_in(&ns, CollectionOptions::new(), store)?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1, v: 5 })?;
            ctx.observer().clear();

            let err = txn
                .unit_of_work(|txn| {
                    collection.write(txn, |generation| {
                        let (id, old) = generation
                            .find_by_id(txn, &json!(1))?
                            .expect("document inserted above");
                        let bytes = old.value().to_bytes()?;
                        let offset = bytes
                            .windows(6)
                            .position(|window| window == b"\"_id\":")
                            .expect("_id is stored verbatim")
                            + 6;
                        let mut args = CollectionUpdateArgs::new(doc! {});
                        generation.update_document_with_damages(
                            txn,
                            &id,
                            &old,
                            b"2",
                            &[DamageEvent::new(0, offset, 1)],
                            &mut args,
                        )
                    })
                })
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::IdMismatch);
            assert_eq!(err.code(), 13596);

            let (_, stored) = collection
                .current()
                .find_by_id(&txn, &json!(1))?
                .expect("original document is restored");
            assert_eq!(stored.value(), &doc! { _id: 1, v: 5 });
            assert!(collection.current().find_by_id(&txn, &json!(2))?.is_none());
            assert!(ctx.observer().events().is_empty());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_damages_refused_with_validator() {
    run_test(
        create_test_context,
        |ctx| {
            let ns = ctx.ns("guarded");
            let store = Arc::new(InMemoryRecordStore::with_config(
                &ns.ns(),
                InMemoryRecordStoreConfig::new().update_in_place(true),
            ));
            let options = CollectionOptions::new().validator(doc! { v: { "$exists": true } });
            let collection = ctx.create_collection_in(&ns, options, store)?;
            assert!(!collection.current().update_with_damages_supported());
            Ok(())
        },
        cleanup,
    )
}
