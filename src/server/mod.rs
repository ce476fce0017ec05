//! Listening socket, connection table and the event loop.

pub mod listener;
pub mod reactor;
pub mod table;

pub use reactor::{Server, ServerHandle};
