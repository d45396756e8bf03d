//! Command execution layer.
//!
//! Receives typed commands from the protocol layer, executes them against
//! the storage engine under its concurrency discipline, and produces typed
//! replies for the connection layer to serialize.
//!
//! ```text
//! Client line + data block
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ protocol parser │
//! └────────┬────────┘
//!          │ Command
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! └────────┬────────┘
//!          │ engine call, one critical section
//!          ▼
//! ┌─────────────────┐
//! │  StorageEngine  │
//! └────────┬────────┘
//!          │ StoreOutcome / ItemViews
//!          ▼
//!        Reply
//! ```

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
