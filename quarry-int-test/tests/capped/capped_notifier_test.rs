use quarry::catalog::CollectionOptions;
use quarry::doc;
use quarry::observer::InsertStatement;
use quarry::transaction::TransactionContext;
use quarry_int_test::test_util::{cleanup, create_test_context, insert_one, run_test};
use std::thread;
use std::time::Duration;

#[test]
fn test_waiter_wakes_on_commit() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("tailed", CollectionOptions::new().capped(1 << 20, 0))?;
            let notifier = collection
                .current()
                .capped_insert_notifier()
                .expect("capped collections have a notifier");
            assert!(collection.current().shared().have_capped_waiters());

            let seen = notifier.version();
            let granularity = ctx.config().capped_wait_granularity();
            let waiter = {
                let notifier = notifier.clone();
                thread::spawn(move || notifier.wait_for_insert(seen, Duration::from_secs(10), granularity))
            };

            let txn = TransactionContext::new();
            insert_one(&collection, &txn, doc! { _id: 1 })?;

            let woke_at = waiter.join().expect("waiter thread panicked");
            assert!(woke_at > seen);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_uncommitted_insert_does_not_notify() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("pending", CollectionOptions::new().capped(1 << 20, 0))?;
            let notifier = collection
                .current()
                .capped_insert_notifier()
                .expect("capped collections have a notifier");
            let seen = notifier.version();

            let txn = TransactionContext::new();
            txn.begin_unit_of_work();
            collection.write(&txn, |generation| {
                generation.insert_document(&txn, InsertStatement::new(doc! { _id: 1 }), None, false)
            })?;
            assert_eq!(notifier.version(), seen);
            txn.abort_unit_of_work();
            assert_eq!(notifier.version(), seen);

            txn.begin_unit_of_work();
            collection.write(&txn, |generation| {
                generation.insert_document(&txn, InsertStatement::new(doc! { _id: 2 }), None, false)
            })?;
            txn.commit_unit_of_work()?;
            assert_eq!(notifier.version(), seen + 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_notifier_dies_with_collection() {
    run_test(
        create_test_context,
        |ctx| {
            let collection = ctx.create_collection("dropped", CollectionOptions::new().capped(1 << 20, 0))?;
            let notifier = collection
                .current()
                .capped_insert_notifier()
                .expect("capped collections have a notifier");
            assert!(!notifier.is_dead());

            drop(collection);
            assert!(notifier.is_dead());

            // a dead notifier never blocks
            let version = notifier.wait_for_insert(notifier.version(), Duration::from_secs(10), Duration::from_secs(1));
            assert_eq!(version, notifier.version());
            Ok(())
        },
        cleanup,
    )
}
