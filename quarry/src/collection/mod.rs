mod capped;
mod ddl;
pub(crate) mod generation;
mod notifier;
mod scan;
mod services;
mod shared_state;
mod versioned;
mod write;

pub use generation::CollectionGeneration;
pub use notifier::*;
pub use scan::*;
pub use services::*;
pub use shared_state::SharedState;
pub use versioned::*;
pub use write::{DeleteOptions, OpDebug};
