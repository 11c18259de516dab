//! Request handlers for the sync protocol.

mod exchange;
mod node;
mod websocket;

pub use exchange::*;
pub use node::*;
pub use websocket::*;
