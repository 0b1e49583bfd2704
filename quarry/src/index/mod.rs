mod index_catalog;
mod index_coordinator;
mod index_spec;

pub use index_catalog::*;
pub use index_coordinator::*;
pub use index_spec::*;
