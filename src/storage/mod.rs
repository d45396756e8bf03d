//! Storage: the LRU cache engine and its background sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      StorageEngine                        │
//! │                                                           │
//! │   ┌───────────────────── Mutex ─────────────────────┐     │
//! │   │                   LruCache                      │     │
//! │   │                                                 │     │
//! │   │  HashMap<key, node>      RecencyList            │     │
//! │   │  ┌──────┬──────┐   head ┌───┐ ┌───┐ ┌───┐ tail  │     │
//! │   │  │ key  │ node │   MRU  │ c │<│ b │<│ a │  LRU  │     │
//! │   │  └──────┴──────┘        └───┘ └───┘ └───┘       │     │
//! │   │            total_bytes ≤ max_capacity           │     │
//! │   └─────────────────────────────────────────────────┘     │
//! │                                                           │
//! │   CAS counter (AtomicU64)      op counters (AtomicU64)    │
//! └───────────────────────────────────────────────────────────┘
//!                             ▲
//!                             │
//!               ┌─────────────┴─────────────┐
//!               │       ExpirySweeper       │
//!               │  (background tokio task)  │
//!               └───────────────────────────┘
//! ```
//!
//! One mutex guards the index, the recency list and the byte counter
//! together, so eviction, insertion and promotion are atomic with respect
//! to each other across all connections.
//!
//! ## Example
//!
//! ```
//! use embercache::storage::{StorageEngine, StoreOutcome};
//! use bytes::Bytes;
//!
//! let engine = StorageEngine::new(64 * 1024 * 1024).unwrap();
//!
//! let outcome = engine
//!     .set("greeting".to_string(), 0, None, Bytes::from("hello"))
//!     .unwrap();
//! assert_eq!(outcome, StoreOutcome::Stored);
//!
//! let hits = engine.get_many(&["greeting".to_string()]);
//! assert_eq!(hits[0].data, Bytes::from("hello"));
//! ```

pub mod engine;
pub mod expiry;
pub mod list;
pub mod lru;

// Re-export commonly used types
pub use engine::{EngineStats, ItemView, StorageEngine, StoreOutcome};
pub use expiry::{start_expiry_sweeper, ExpirySweeper, SweeperConfig};
pub use lru::{
    canonical_expiration, CacheEntry, EngineError, LruCache, RELATIVE_EXPTIME_LIMIT_SECS,
};
