//! HTTP/1.1 protocol layer.
//!
//! # Architecture
//!
//! - **`connection`**: per-client state and the read/process/write cycle
//! - **`parser`**: incremental request parser over the inbound buffer
//! - **`request`**: parsed request representation and keep-alive rule
//! - **`response`**: status codes, header serialization, body attachment
//! - **`writer`**: two-slot vectored write bookkeeping
//! - **`static_files`**: document-root lookup and file mapping
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← readable event, worker drains socket
//!        └──────┬──────┘
//!               │ bytes buffered
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← parse; incomplete → re-arm readable
//!        └──────┬───────────┘
//!               │ response assembled
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← writable event, vectored writes
//!        └──────┬───────────┘
//!               │ response sent
//!               ├─ Keep-Alive → Processing (same connection)
//!               └─ Close → Closed
//! ```

pub mod connection;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod static_files;
pub mod writer;
