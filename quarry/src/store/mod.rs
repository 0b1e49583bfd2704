mod fault;
mod memory;
mod record_store;

pub use fault::*;
pub use memory::{InMemoryRecordStore, InMemoryRecordStoreConfig};
pub use record_store::*;

pub(crate) use memory::write_conflict;
