use quarry::catalog::{CollectionOptions, InMemoryDurableCatalog, Namespace};
use quarry::collection::{CollectionServices, ScanDirection, VersionedCollection};
use quarry::document::{Document, RecordId};
use quarry::errors::{ErrorKind, QuarryError, QuarryResult};
use quarry::observer::{CollectionUpdateArgs, InsertStatement, RecordingObserver};
use quarry::quarry_config::QuarryConfig;
use quarry::store::{InMemoryRecordStore, RecordStore};
use quarry::transaction::TransactionContext;
use serde_json::Value;
use std::backtrace::Backtrace;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Runs a test with retry logic and error handling.
/// Tests run on the current thread so a hanging fail point shows up in the
/// test that armed it.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> QuarryResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> QuarryResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> QuarryResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    const MAX_RETRIES: u32 = 3;
    let mut last_error: Option<String> = None;
    let mut last_backtrace: Option<String> = None;

    for attempt in 1..=MAX_RETRIES {
        let start_time = Instant::now();

        let result = std::panic::catch_unwind(|| {
            let backtrace = Backtrace::capture();
            match before() {
                Ok(ctx) => match test(ctx.clone()) {
                    Ok(_) => match after(ctx) {
                        Ok(_) => Ok(()),
                        Err(e) => Err((format!("After run failed: {:?}", e), backtrace.to_string())),
                    },
                    Err(e) => {
                        let _ = after(ctx);
                        Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                    }
                },
                Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
            }
        });

        let elapsed = start_time.elapsed();

        match result {
            Ok(Ok(_)) => return,
            Ok(Err((e, bt))) => {
                last_error = Some(e.clone());
                last_backtrace = Some(bt);
                if attempt < MAX_RETRIES {
                    eprintln!(
                        "\n========== Test Attempt {}/{} Failed (took {:?}) ==========",
                        attempt, MAX_RETRIES, elapsed
                    );
                    eprintln!("Error: {}", e);
                    thread::sleep(Duration::from_millis(100 * attempt as u64));
                }
            }
            Err(panic_err) => {
                let err_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                last_error = Some(format!("Panic: {}", err_msg));
                last_backtrace = Some(Backtrace::capture().to_string());

                if attempt < MAX_RETRIES {
                    eprintln!(
                        "\n========== Test Attempt {}/{} Panicked (took {:?}) ==========",
                        attempt, MAX_RETRIES, elapsed
                    );
                    eprintln!("{}", err_msg);
                    thread::sleep(Duration::from_millis(100 * attempt as u64));
                }
            }
        }
    }

    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Failed after {} attempts", MAX_RETRIES);
    eprintln!("Last error: {}", last_error.as_deref().unwrap_or("Unknown"));
    if let Some(bt) = &last_backtrace {
        if !bt.is_empty() && !bt.contains("disabled") {
            eprintln!("\nBacktrace:\n{}", bt);
        }
    }
    eprintln!("=====================================================\n");

    panic!(
        "Test failed after {} attempts. Last error: {}",
        MAX_RETRIES,
        last_error.unwrap_or_default()
    );
}

/// Collaborators of one test. Every context writes into its own database so
/// namespace scoped fail points never leak between tests.
#[derive(Clone)]
pub struct TestContext {
    db: String,
    config: QuarryConfig,
    observer: Arc<RecordingObserver>,
    catalog: Arc<InMemoryDurableCatalog>,
    services: CollectionServices,
}

impl TestContext {
    pub fn new() -> Self {
        let config = QuarryConfig::new();
        let observer = Arc::new(RecordingObserver::new());
        let catalog = Arc::new(InMemoryDurableCatalog::new());
        let services = CollectionServices::builder()
            .config(config.clone())
            .observer(observer.clone())
            .durable_catalog(catalog.clone())
            .build();
        TestContext {
            db: format!("db_{}", uuid::Uuid::new_v4().simple()),
            config,
            observer,
            catalog,
            services,
        }
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn ns(&self, coll: &str) -> Namespace {
        Namespace::new(&self.db, coll)
    }

    pub fn config(&self) -> &QuarryConfig {
        &self.config
    }

    pub fn observer(&self) -> &Arc<RecordingObserver> {
        &self.observer
    }

    pub fn catalog(&self) -> &Arc<InMemoryDurableCatalog> {
        &self.catalog
    }

    pub fn services(&self) -> &CollectionServices {
        &self.services
    }

    pub fn create_collection(&self, coll: &str, options: CollectionOptions) -> QuarryResult<VersionedCollection> {
        let ns = self.ns(coll);
        let store = Arc::new(InMemoryRecordStore::new(&ns.ns()));
        self.create_collection_in(&ns, options, store)
    }

    pub fn create_collection_in(
        &self,
        ns: &Namespace,
        options: CollectionOptions,
        store: Arc<dyn RecordStore>,
    ) -> QuarryResult<VersionedCollection> {
        let txn = TransactionContext::new();
        VersionedCollection::create(&txn, &self.services, ns, &options, store)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

pub fn create_test_context() -> QuarryResult<TestContext> {
    Ok(TestContext::new())
}

pub fn cleanup(ctx: TestContext) -> QuarryResult<()> {
    ctx.observer().clear();
    ctx.observer().fail_next(0);
    Ok(())
}

/// Inserts `doc` in a unit of work of its own.
pub fn insert_one(collection: &VersionedCollection, txn: &TransactionContext, doc: Document) -> QuarryResult<()> {
    txn.unit_of_work(|txn| {
        collection.write(txn, |generation| {
            generation.insert_document(txn, InsertStatement::new(doc), None, false)
        })
    })
}

/// Inserts `docs` as one batch in a unit of work of its own.
pub fn insert_batch(collection: &VersionedCollection, txn: &TransactionContext, docs: Vec<Document>) -> QuarryResult<()> {
    txn.unit_of_work(|txn| {
        collection.write(txn, |generation| {
            let statements = docs.into_iter().map(InsertStatement::new).collect();
            generation.insert_documents(txn, statements, None, false)
        })
    })
}

/// Replaces the document with `_id` equal to `id` in a unit of work of its own.
pub fn replace_by_id(
    collection: &VersionedCollection,
    txn: &TransactionContext,
    id: Value,
    new_doc: Document,
) -> QuarryResult<RecordId> {
    txn.unit_of_work(|txn| {
        collection.write(txn, |generation| {
            let (record_id, old) = generation.find_by_id(txn, &id)?.ok_or_else(|| {
                QuarryError::new(&format!("no document with _id {}", id), ErrorKind::NotFound)
            })?;
            let mut args = CollectionUpdateArgs::new(new_doc.clone());
            generation.update_document(txn, &record_id, &old, new_doc, true, None, &mut args)
        })
    })
}

/// `_id` values of the collection in record order.
pub fn ids_of(collection: &VersionedCollection, txn: &TransactionContext) -> QuarryResult<Vec<Value>> {
    let mut ids = Vec::new();
    for item in collection.current().make_collection_scan(txn, ScanDirection::Forward)? {
        let (_, doc) = item?;
        ids.push(doc.value().get("_id").cloned().unwrap_or(Value::Null));
    }
    Ok(ids)
}
