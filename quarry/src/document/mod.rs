mod damage;
mod document;
mod record_id;

pub use damage::*;
pub use document::*;
pub use record_id::*;
