//! Database module for PostgreSQL persistence.

mod clocks;
mod messages;
mod pool;

pub use clocks::*;
pub use messages::*;
pub use pool::*;
