//! Request handlers.

pub mod health;
pub mod status;
pub mod trigger;

pub use health::*;
pub use status::*;
pub use trigger::*;
