mod decorations;
mod fail_point;
mod lock;
mod types;

pub use decorations::*;
pub use fail_point::*;
pub use lock::*;
pub use types::*;
