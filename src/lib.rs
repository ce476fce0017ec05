//! Kiln - Reactor-Style Static HTTP Server
//!
//! Core library: epoll event loop, worker pool, idle timers and the
//! HTTP/1.1 connection state machine.

pub mod buffer;
pub mod config;
pub mod http;
pub mod logging;
pub mod poller;
pub mod pool;
pub mod server;
pub mod store;
pub mod timer;
