//! WebSocket notifications for sync groups.
//!
//! Clients subscribe to a group over a WebSocket and are told when another
//! client has delivered new messages, so they can run a sync session instead
//! of polling.

mod manager;
mod protocol;

pub use manager::ConnectionManager;
pub use protocol::*;
