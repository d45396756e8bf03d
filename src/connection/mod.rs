//! Connection handling.
//!
//! One task per accepted client, each running its own read-parse-execute-
//! respond loop against the shared storage engine. Commands on a single
//! connection are processed strictly in arrival order; across connections
//! the only ordering is whatever the engine lock serializes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  TCP listener                   │
//! │                   (main.rs)                     │
//! └──────────────────────┬──────────────────────────┘
//!                        │ accept()
//!                        ▼
//!            ┌───────────────────────┐
//!            │  spawn task per client │
//!            └───────────┬───────────┘
//!                        ▼
//! ┌─────────────────────────────────────────────────┐
//! │               ConnectionHandler                 │
//! │                                                 │
//! │  read line ─► parse ─► read data block          │
//! │                  │                              │
//! │                  ▼                              │
//! │          execute on engine ─► write reply       │
//! │          (skipped reply on noreply)             │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
