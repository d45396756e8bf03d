//! # embercache - A Memcached-Compatible In-Memory LRU Cache Server
//!
//! embercache is a single-process, memory-only cache server speaking the
//! text subset of the memcached wire protocol. Clients store and retrieve
//! byte blobs keyed by strings, with per-item flags, expiration and a CAS
//! token, under a fixed byte budget enforced by least-recently-used
//! eviction.
//!
//! ## Features
//!
//! - **Memcached text protocol**: `set`, `add`, `replace`, `append`,
//!   `prepend`, `cas`, `get` and `gets`, including `noreply`
//! - **Strict LRU**: O(1) keyed store over a doubly-linked recency list,
//!   evicting from the tail until a new item fits
//! - **Expiration**: lazy on read plus a periodic background sweep
//! - **Async I/O**: built on Tokio, one task per client connection
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           embercache                           │
//! │                                                                │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐         │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │         │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │         │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘         │
//! │                            │                  │                │
//! │                            ▼                  ▼                │
//! │  ┌──────────────────────────────┐   ┌──────────────────────┐   │
//! │  │   Text protocol parser +     │   │    StorageEngine     │   │
//! │  │   validation                 │   │  ┌────────────────┐  │   │
//! │  └──────────────────────────────┘   │  │ Mutex<LruCache>│  │   │
//! │                                     │  │ index + recency│  │   │
//! │                                     │  │ list + bytes   │  │   │
//! │                                     │  └────────────────┘  │   │
//! │                                     └──────────▲───────────┘   │
//! │                                                │               │
//! │                              ┌─────────────────┴────────────┐  │
//! │                              │        ExpirySweeper         │  │
//! │                              │    (background tokio task)   │  │
//! │                              └──────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use embercache::commands::CommandHandler;
//! use embercache::connection::{handle_connection, ConnectionStats};
//! use embercache::storage::{start_expiry_sweeper, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     // One shared engine with a 64 MiB budget
//!     let storage = Arc::new(StorageEngine::new(64 * 1024 * 1024).unwrap());
//!
//!     // Reclaim expired entries in the background
//!     let _sweeper = start_expiry_sweeper(Arc::clone(&storage));
//!
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind("127.0.0.1:11211").await.unwrap();
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         let commands = CommandHandler::new(Arc::clone(&storage));
//!         let stats = Arc::clone(&stats);
//!
//!         tokio::spawn(handle_connection(stream, addr, commands, stats));
//!     }
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: text protocol parsing, validation and replies
//! - [`storage`]: LRU cache engine, recency list and expiry sweeper
//! - [`commands`]: execution of typed commands against the engine
//! - [`connection`]: client connection management
//!
//! ## Concurrency Model
//!
//! All connection tasks and the sweeper share exactly one
//! [`storage::StorageEngine`], whose internals are guarded by a single
//! mutex. Every engine operation runs in one critical section, so CAS
//! check-then-act, eviction and promotion are atomic with respect to each
//! other. The lock is never held across network I/O: data blocks are read
//! off the socket before the engine is invoked.
//!
//! ## Limits
//!
//! Keys are at most 250 bytes with no control characters; data blocks are
//! at most 1 MiB; flags fit 16 bits; CAS tokens fit 64 bits; the default
//! cache budget is 64 MiB and must be positive.

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionError, ConnectionStats};
pub use protocol::{parse_command_line, ClientError, Command, Reply};
pub use storage::{start_expiry_sweeper, ExpirySweeper, StorageEngine, SweeperConfig};

/// The default port embercache listens on (same as memcached)
pub const DEFAULT_PORT: u16 = 11211;

/// The default host embercache binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// The default cache capacity in bytes (64 MiB)
pub const DEFAULT_CAPACITY: usize = 64 * 1024 * 1024;

/// Version of embercache
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
