use quarry::catalog::CollectionOptions;
use quarry::doc;
use quarry::document::RecordId;
use quarry::errors::ErrorKind;
use quarry::index::IndexSpec;
use quarry::transaction::TransactionContext;
use quarry::validation::ValidationLevel;
use quarry_int_test::test_util::{cleanup, create_test_context, ids_of, insert_one, run_test};
use serde_json::json;

#[test]
fn test_modify_installs_and_retires_generations() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("generations", CollectionOptions::new())?;
            let first = collection.current();
            assert!(first.is_committed());
            assert_eq!(first.shared().latest_generation_id(), Some(first.id()));
            assert_eq!(first.shared().previous_generation_id(), None);

            let txn = TransactionContext::new();
            txn.unit_of_work(|txn| {
                collection.modify(txn, |generation| generation.set_validation_level(txn, ValidationLevel::Moderate))
            })?;

            let second = collection.current();
            assert_ne!(second.id(), first.id());
            assert!(second.shared().ptr_eq(first.shared()));
            assert!(second.is_committed());
            assert_eq!(second.shared().latest_generation_id(), Some(second.id()));
            assert_eq!(second.shared().previous_generation_id(), Some(first.id()));
            assert_eq!(first.validation_level(), ValidationLevel::Strict);
            assert_eq!(second.validation_level(), ValidationLevel::Moderate);

            drop(first);
            assert_eq!(second.shared().latest_generation_id(), Some(second.id()));
            assert_eq!(second.shared().previous_generation_id(), None);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_failed_modify_keeps_current_generation() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("plain", CollectionOptions::new())?;
            let before = collection.current();
            let txn = TransactionContext::new();

            let err = txn
                .unit_of_work(|txn| collection.modify(txn, |generation| generation.update_capped_size(txn, 4096)))
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InvalidNamespace);
            assert_eq!(collection.current().id(), before.id());
            assert_eq!(before.shared().latest_generation_id(), Some(before.id()));
            assert!(!before.shared().collection_lock().is_locked_exclusive());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_capped_truncate_unindexes_through_latest_generation() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("truncated", CollectionOptions::new().capped(1 << 20, 0))?;
            let txn = TransactionContext::new();

            txn.unit_of_work(|txn| {
                collection.modify(txn, |generation| {
                    generation.begin_index_build(txn, IndexSpec::new("v_1", "v"))?;
                    generation.index_build_success(txn, "v_1")
                })
            })?;
            assert!(collection.current().indexes().find_index("v_1").is_some());

            for id in 1..=3 {
                insert_one(&collection, &txn, doc! { _id: id, v: (id * 10) })?;
            }
            let generation = collection.current();
            assert_eq!(generation.indexes().lookup("v_1", &json!(20))?.len(), 1);

            txn.unit_of_work(|txn| {
                collection.write(txn, |generation| generation.capped_truncate_after(txn, &RecordId::Long(1), false))
            })?;

            assert_eq!(ids_of(&collection, &txn)?, vec![json!(1)]);
            assert!(generation.indexes().lookup("v_1", &json!(20))?.is_empty());
            assert!(generation.indexes().lookup("v_1", &json!(30))?.is_empty());
            assert_eq!(generation.indexes().lookup("v_1", &json!(10))?.len(), 1);
            assert!(generation.indexes().lookup("_id_", &json!(3))?.is_empty());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_rolled_back_truncate_restores_keys() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("restored", CollectionOptions::new())?;
            let txn = TransactionContext::new();
            for id in 1..=2 {
                insert_one(&collection, &txn, doc! { _id: id })?;
            }

            txn.begin_unit_of_work();
            collection.write(&txn, |generation| generation.truncate(&txn))?;
            assert!(collection.current().is_empty(&txn)?);
            txn.abort_unit_of_work();

            assert_eq!(ids_of(&collection, &txn)?, vec![json!(1), json!(2)]);
            assert_eq!(collection.current().indexes().lookup("_id_", &json!(2))?.len(), 1);
            Ok(())
        },
        cleanup,
    )
}
