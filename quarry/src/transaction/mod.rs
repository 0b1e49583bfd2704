mod context;
mod snapshotted;

pub use context::*;
pub use snapshotted::*;
