//! Command execution: typed commands in, typed replies out.
//!
//! `CommandHandler` sits between the protocol layer and the storage engine.
//! The connection layer has already parsed and validated the command line
//! and read the data block; this module canonicalizes the expiration,
//! invokes the matching engine operation and maps its outcome to the
//! protocol reply. It never touches the socket.

use bytes::Bytes;
use std::sync::Arc;
use std::time::SystemTime;

use crate::protocol::types::{Command, Reply, RetrievalCommand, StorageCommand, StorageVerb, Value};
use crate::protocol::validate::ClientError;
use crate::storage::{canonical_expiration, StorageEngine, StoreOutcome};

/// Executes commands against the shared storage engine.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Executes a command whose data block (if any) has been read.
    pub fn execute(&self, command: Command, data_block: Bytes) -> Reply {
        match command {
            Command::Storage(cmd) => self.storage_command(&cmd, data_block),
            Command::Retrieval(cmd) => self.retrieval_command(&cmd),
        }
    }

    /// Runs one storage command and maps its outcome to a reply.
    pub fn storage_command(&self, cmd: &StorageCommand, data: Bytes) -> Reply {
        let expires_at = canonical_expiration(cmd.exptime, SystemTime::now());

        let result = match cmd.verb {
            StorageVerb::Set => self
                .storage
                .set(cmd.key.clone(), cmd.flags, expires_at, data),
            StorageVerb::Add => self
                .storage
                .add(cmd.key.clone(), cmd.flags, expires_at, data),
            StorageVerb::Replace => {
                self.storage
                    .replace(cmd.key.clone(), cmd.flags, expires_at, data)
            }
            StorageVerb::Append => self.storage.append(&cmd.key, data),
            StorageVerb::Prepend => self.storage.prepend(&cmd.key, data),
            StorageVerb::Cas => {
                let token = cmd.cas_token.expect("cas command parsed without a token");
                self.storage
                    .cas(cmd.key.clone(), cmd.flags, expires_at, data, token)
            }
        };

        match result {
            Ok(StoreOutcome::Stored) => Reply::Stored,
            Ok(StoreOutcome::NotStored) => Reply::NotStored,
            Ok(StoreOutcome::Exists) => Reply::Exists,
            Ok(StoreOutcome::NotFound) => Reply::NotFound,
            // The only runtime store error: the item cannot fit the budget.
            Err(_) => Reply::ClientError(ClientError::DataBlockOverCapacity),
        }
    }

    /// Runs one retrieval command: VALUE lines in request order, then END.
    pub fn retrieval_command(&self, cmd: &RetrievalCommand) -> Reply {
        let hits = self.storage.get_many(&cmd.keys);
        let values = hits
            .into_iter()
            .map(|item| Value {
                key: item.key,
                flags: item.flags,
                data: item.data,
                cas: cmd.with_cas.then_some(item.cas),
            })
            .collect();
        Reply::Values(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_command_line;

    fn handler_with_capacity(capacity: usize) -> CommandHandler {
        CommandHandler::new(Arc::new(StorageEngine::new(capacity).unwrap()))
    }

    fn handler() -> CommandHandler {
        handler_with_capacity(64 * 1024)
    }

    /// Parses a line and executes it with the given data block.
    fn run(handler: &CommandHandler, line: &str, data: &str) -> Reply {
        let command = parse_command_line(line).unwrap();
        handler.execute(command, Bytes::from(data.to_string()))
    }

    #[test]
    fn test_set_and_get() {
        let handler = handler();
        assert_eq!(run(&handler, "set foo 5 0 3", "bar"), Reply::Stored);

        let reply = run(&handler, "get foo", "");
        assert_eq!(reply.serialize(), b"VALUE foo 5 3\r\nbar\r\nEND\r\n");
    }

    #[test]
    fn test_add_scenario() {
        // add stores on a cold key, refuses on a warm one.
        let handler = handler();
        assert_eq!(run(&handler, "add foo 0 0 3", "bar"), Reply::Stored);
        assert_eq!(run(&handler, "add foo 0 0 3", "baz"), Reply::NotStored);

        let reply = run(&handler, "get foo", "");
        assert_eq!(reply.serialize(), b"VALUE foo 0 3\r\nbar\r\nEND\r\n");
    }

    #[test]
    fn test_replace_missing_key() {
        let handler = handler();
        assert_eq!(run(&handler, "replace foo 0 0 3", "bar"), Reply::NotStored);
        assert_eq!(run(&handler, "get foo", "").serialize(), b"END\r\n");
    }

    #[test]
    fn test_cas_stale_token_scenario() {
        let handler = handler();
        assert_eq!(run(&handler, "set foo 0 0 3", "bar"), Reply::Stored);

        // Find the live token via gets, then miss with a stale one.
        let reply = run(&handler, "gets foo", "");
        let token = match &reply {
            Reply::Values(values) => values[0].cas.unwrap(),
            other => panic!("unexpected reply {:?}", other),
        };

        assert_eq!(
            run(&handler, &format!("cas foo 0 0 3 {}", token + 7), "new"),
            Reply::Exists
        );
        assert_eq!(
            run(&handler, "get foo", "").serialize(),
            b"VALUE foo 0 3\r\nbar\r\nEND\r\n"
        );

        // The current token wins.
        assert_eq!(
            run(&handler, &format!("cas foo 0 0 3 {}", token), "new"),
            Reply::Stored
        );
    }

    #[test]
    fn test_cas_missing_key() {
        let handler = handler();
        assert_eq!(run(&handler, "cas ghost 0 0 3 12", "new"), Reply::NotFound);
    }

    #[test]
    fn test_append_prepend() {
        let handler = handler();
        run(&handler, "set k 9 0 5", "World");
        assert_eq!(run(&handler, "prepend k 0 0 6", "Hello "), Reply::Stored);
        assert_eq!(run(&handler, "append k 0 0 1", "!"), Reply::Stored);

        // Flags stay from the original set even though the concatenating
        // commands carried different ones.
        let reply = run(&handler, "get k", "");
        assert_eq!(
            reply.serialize(),
            b"VALUE k 9 12\r\nHello World!\r\nEND\r\n"
        );
    }

    #[test]
    fn test_multi_get_skips_missing_key() {
        let handler = handler();
        run(&handler, "set k1 0 0 2", "v1");
        run(&handler, "set k3 0 0 2", "v3");

        let reply = run(&handler, "get k1 k2 k3", "");
        assert_eq!(
            reply.serialize(),
            b"VALUE k1 0 2\r\nv1\r\nVALUE k3 0 2\r\nv3\r\nEND\r\n"
        );
    }

    #[test]
    fn test_gets_includes_tokens() {
        let handler = handler();
        run(&handler, "set a 0 0 1", "x");
        run(&handler, "set b 0 0 1", "y");

        let reply = run(&handler, "gets a b", "");
        match reply {
            Reply::Values(values) => {
                assert_eq!(values.len(), 2);
                assert!(values.iter().all(|v| v.cas.is_some()));
                assert_ne!(values[0].cas, values[1].cas);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_expired_entry_reads_as_end() {
        let handler = handler();
        // Negative exptime canonicalizes to already-expired.
        assert_eq!(run(&handler, "set gone 0 -1 4", "data"), Reply::Stored);
        assert_eq!(run(&handler, "get gone", "").serialize(), b"END\r\n");
    }

    #[test]
    fn test_store_evicts_least_recently_used() {
        // Scenario 1 at the command level, 10 byte budget.
        let handler = handler_with_capacity(10);
        run(&handler, "set a 0 0 5", "11111");
        run(&handler, "set b 0 0 5", "22222");
        assert_eq!(run(&handler, "set c 0 0 5", "33333"), Reply::Stored);

        assert_eq!(run(&handler, "get a", "").serialize(), b"END\r\n");
        assert_eq!(
            run(&handler, "get b", "").serialize(),
            b"VALUE b 0 5\r\n22222\r\nEND\r\n"
        );
        assert_eq!(
            run(&handler, "get c", "").serialize(),
            b"VALUE c 0 5\r\n33333\r\nEND\r\n"
        );
    }

    #[test]
    fn test_block_larger_than_cache_capacity() {
        let handler = handler_with_capacity(4);
        assert_eq!(
            run(&handler, "set big 0 0 5", "12345"),
            Reply::ClientError(ClientError::DataBlockOverCapacity)
        );
    }
}
