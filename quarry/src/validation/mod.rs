mod features;
mod match_compiler;
mod predicate;
mod validator;

pub use features::*;
pub use match_compiler::*;
pub use predicate::*;
pub use validator::*;
