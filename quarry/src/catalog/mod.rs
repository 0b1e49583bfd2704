mod durable_catalog;
mod namespace;
mod options;

pub use durable_catalog::*;
pub use namespace::*;
pub use options::*;
