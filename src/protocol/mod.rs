//! Memcached text protocol implementation.
//!
//! The protocol is line-oriented: every request and response line ends in
//! CRLF, and storage commands carry one raw data block between the command
//! line and the next command.
//!
//! ## Modules
//!
//! - `types`: typed commands and replies plus wire serialization
//! - `validate`: stateless per-token validation checks
//! - `parser`: command-line tokenizing into typed commands
//!
//! ## Example
//!
//! ```
//! use embercache::protocol::{parse_command_line, Command, Reply};
//!
//! let command = parse_command_line("set greeting 0 0 5").unwrap();
//! assert!(matches!(command, Command::Storage(_)));
//!
//! let reply = Reply::Stored;
//! assert_eq!(reply.serialize(), b"STORED\r\n");
//! ```

pub mod parser;
pub mod types;
pub mod validate;

// Re-export commonly used types for convenience
pub use parser::{parse_command_line, ParseFailure};
pub use types::{Command, Reply, RetrievalCommand, StorageCommand, StorageVerb, Value, CRLF};
pub use validate::{ClientError, MAX_DATA_BLOCK_LENGTH, MAX_KEY_LENGTH};
