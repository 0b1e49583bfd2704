use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Typed attachments shared by every generation of a collection.
///
/// Other subsystems hang their per-collection state here, keyed by type.
#[derive(Default)]
pub struct Decorations {
    values: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Decorations {
    pub fn new() -> Self {
        Decorations {
            values: DashMap::new(),
        }
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.value().clone().downcast::<T>().ok())
    }

    pub fn get_or_insert_with<T: Any + Send + Sync>(&self, init: impl FnOnce() -> T) -> Arc<T> {
        let value = self
            .values
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(init()))
            .value()
            .clone();
        match value.downcast::<T>() {
            Ok(typed) => typed,
            // the map is keyed by TypeId so the downcast cannot fail
            Err(_) => unreachable!("decoration stored under a foreign type id"),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
