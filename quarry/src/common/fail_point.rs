use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

/// Fails inserts into the namespace named by `collectionNS` (or every namespace).
pub const FAIL_COLLECTION_INSERTS: &str = "failCollectionInserts";
/// Blocks inserts after they are applied until the fail point is disabled.
pub const HANG_AFTER_COLLECTION_INSERTS: &str = "hangAfterCollectionInserts";
/// Raises a write conflict after a bulk loader insert.
pub const FAIL_AFTER_BULK_LOAD_DOC_INSERT: &str = "failAfterBulkLoadDocInsert";
/// Keeps a validator that failed to compile instead of rejecting it.
pub const ALLOW_SETTING_MALFORMED_COLLECTION_VALIDATORS: &str =
    "allowSettingMalformedCollectionValidators";
/// Stores only the first half of every inserted record.
pub const CORRUPT_DOCUMENT_ON_INSERT: &str = "corruptDocumentOnInsert";

static REGISTRY: LazyLock<DashMap<String, Arc<FailPoint>>> = LazyLock::new(DashMap::new);

/// Returns the process wide fail point registered under `name`, creating it
/// disabled on first use.
pub fn fail_point(name: &str) -> Arc<FailPoint> {
    REGISTRY
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(FailPoint::new(name)))
        .clone()
}

/// A named test hook that can be switched on with an arbitrary JSON payload.
pub struct FailPoint {
    name: String,
    state: Mutex<Option<Value>>,
    cond: Condvar,
    hits: AtomicU64,
}

impl FailPoint {
    fn new(name: &str) -> Self {
        FailPoint {
            name: name.to_string(),
            state: Mutex::new(None),
            cond: Condvar::new(),
            hits: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enable(&self, data: Value) {
        log::info!("Fail point {} enabled with {}", self.name, data);
        *self.state.lock() = Some(data);
    }

    /// Enables the fail point until the returned guard is dropped.
    pub fn scoped(self: &Arc<Self>, data: Value) -> FailPointGuard {
        self.enable(data);
        FailPointGuard {
            point: self.clone(),
        }
    }

    pub fn disable(&self) {
        let mut state = self.state.lock();
        if state.take().is_some() {
            log::info!("Fail point {} disabled", self.name);
        }
        self.cond.notify_all();
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().is_some()
    }

    pub fn times_entered(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Runs `f` with the payload when the fail point is on and `predicate`
    /// accepts the payload.
    pub fn execute_if<R>(
        &self,
        predicate: impl FnOnce(&Value) -> bool,
        f: impl FnOnce(&Value) -> R,
    ) -> Option<R> {
        let data = self.state.lock().clone()?;
        if !predicate(&data) {
            return None;
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(f(&data))
    }

    /// Returns the payload when the fail point is on and targets `ns`.
    pub fn check_for_namespace(&self, ns: &str) -> Option<Value> {
        self.execute_if(|data| targets_namespace(data, ns), |data| data.clone())
    }

    /// Blocks the calling thread while the fail point is on and targets `ns`.
    pub fn pause_while_set_for(&self, ns: &str) {
        let mut state = self.state.lock();
        let mut entered = false;
        while state
            .as_ref()
            .map(|data| targets_namespace(data, ns))
            .unwrap_or(false)
        {
            if !entered {
                entered = true;
                self.hits.fetch_add(1, Ordering::Relaxed);
                log::info!("Fail point {} pausing operation on {}", self.name, ns);
            }
            self.cond.wait(&mut state);
        }
    }
}

/// Disables its fail point on drop.
pub struct FailPointGuard {
    point: Arc<FailPoint>,
}

impl Drop for FailPointGuard {
    fn drop(&mut self) {
        self.point.disable();
    }
}

fn targets_namespace(data: &Value, ns: &str) -> bool {
    match data.get("collectionNS").and_then(Value::as_str) {
        Some(target) => target == ns,
        None => true,
    }
}
