use quarry::catalog::CollectionOptions;
use quarry::common::{fail_point, ALLOW_SETTING_MALFORMED_COLLECTION_VALIDATORS};
use quarry::doc;
use quarry::errors::ErrorKind;
use quarry::transaction::{OperationOptions, TransactionContext};
use quarry::validation::{ValidationAction, ValidationLevel};
use quarry_int_test::test_util::{cleanup, create_test_context, ids_of, insert_one, replace_by_id, run_test};
use serde_json::json;

fn min_ten() -> CollectionOptions {
    CollectionOptions::new().validator(doc! { v: { "$gte": 10 } })
}

#[test]
fn test_strict_rejects_invalid_documents() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("strict", min_ten())?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1, v: 20 })?;

            let err = insert_one(&collection, &txn, doc! { _id: 2, v: 1 }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::DocumentValidationFailure);
            assert_eq!(err.code(), 121);
            assert_eq!(ids_of(&collection, &txn)?, vec![json!(1)]);

            let err = replace_by_id(&collection, &txn, json!(1), doc! { _id: 1, v: 5 }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::DocumentValidationFailure);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_moderate_tolerates_already_invalid_documents() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("moderate", min_ten())?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1, v: 20 })?;

            let bypass = TransactionContext::with_options(OperationOptions::new().validation_disabled(true));
            insert_one(&collection, &bypass, doc! { _id: 2, v: 1 })?;

            // strict refuses to touch the invalid document
            let err = replace_by_id(&collection, &txn, json!(2), doc! { _id: 2, v: 2 }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::DocumentValidationFailure);

            txn.unit_of_work(|txn| {
                collection.modify(txn, |generation| generation.set_validation_level(txn, ValidationLevel::Moderate))
            })?;

            replace_by_id(&collection, &txn, json!(2), doc! { _id: 2, v: 3 })?;
            let err = replace_by_id(&collection, &txn, json!(1), doc! { _id: 1, v: 5 }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::DocumentValidationFailure);
            replace_by_id(&collection, &txn, json!(1), doc! { _id: 1, v: 50 })?;
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_warn_action_accepts_invalid_documents() {
    run_test(
        create_test_context,
        |ctx| {
            let options = min_ten().validation_action(ValidationAction::Warn);
            let collection = ctx.create_collection("warned", options)?;
            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1, v: 1 })?;
            assert_eq!(ids_of(&collection, &txn)?, vec![json!(1)]);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_off_level_skips_validation() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("off", min_ten())?;
            let txn = TransactionContext::new();
            txn.unit_of_work(|txn| {
                collection.modify(txn, |generation| generation.set_validation_level(txn, ValidationLevel::Off))
            })?;
            insert_one(&collection, &txn, doc! { _id: 1, v: 1 })?;
            assert_eq!(collection.current().num_records(&txn), 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_malformed_validator_is_reported_on_write() {
    run_test(
        create_test_context,
        |ctx| {
            let options = CollectionOptions::new().validator(doc! { v: { "$bogus": 1 } });
            let collection = ctx.create_collection("malformed", options)?;
            assert!(!collection.current().validator().is_ok());

            let txn = TransactionContext::new();
            let err = insert_one(&collection, &txn, doc! { _id: 1, v: 1 }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InvalidValidator);

            // a bad replacement validator is refused and the old one stays
            let valid = ctx.create_collection("kept", min_ten())?;
            let err = txn
                .unit_of_work(|txn| {
                    valid.modify(txn, |generation| generation.set_validator(txn, doc! { v: { "$bogus": 1 } }))
                })
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InvalidValidator);
            assert_eq!(valid.current().validator().spec(), &doc! { v: { "$gte": 10 } });
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_malformed_validator_allowed_by_fail_point() {
    run_test(
        create_test_context,
        |ctx| {
            let ns = ctx.ns("tolerated");
            let _guard = fail_point(ALLOW_SETTING_MALFORMED_COLLECTION_VALIDATORS)
                .scoped(json!({ "collectionNS": ns.ns() }));

            let options = CollectionOptions::new().validator(doc! { v: { "$bogus": 1 } });
            let collection = ctx.create_collection("tolerated", options)?;
            assert!(collection.current().validator().is_ok());
            assert!(collection.current().validator().is_inactive());

            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1, v: 1 })?;

            // other namespaces still compile their validators
            let other = ctx.create_collection("untouched", CollectionOptions::new().validator(doc! { v: { "$bogus": 1 } }))?;
            assert!(!other.current().validator().is_ok());
            Ok(())
        },
        cleanup,
    )
}
