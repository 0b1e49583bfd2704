mod chain;
mod log_observer;
mod recording;

pub use chain::*;
pub use log_observer::*;
pub use recording::*;
