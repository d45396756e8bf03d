//! Typed model of the memcached text protocol.
//!
//! A wire conversation is line-oriented and CRLF-terminated. Requests are
//! parsed into [`Command`] values; responses are built as [`Reply`] values
//! and serialized back to the exact wire bytes.
//!
//! ## Wire format
//!
//! Storage request: `<cmd> <key> <flags> <exptime> <length> [<cas_unique>]
//! [noreply]\r\n<data block>\r\n`
//!
//! Retrieval request: `get|gets <key>+\r\n`
//!
//! Responses: `STORED`, `NOT_STORED`, `EXISTS`, `NOT_FOUND`,
//! `CLIENT_ERROR <message>`, `ERROR`, and for retrieval zero or more
//! `VALUE <key> <flags> <length> [<cas_unique>]` lines each followed by the
//! data block, closed by `END`. All lines end in CRLF.

use bytes::Bytes;

use crate::protocol::validate::ClientError;

/// The CRLF line terminator.
pub const CRLF: &[u8] = b"\r\n";

/// The six storage verbs of the text protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageVerb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
}

impl StorageVerb {
    /// Maps a command-name token to a verb. Case-sensitive: the protocol
    /// commands are lowercase.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "set" => Some(Self::Set),
            "add" => Some(Self::Add),
            "replace" => Some(Self::Replace),
            "append" => Some(Self::Append),
            "prepend" => Some(Self::Prepend),
            "cas" => Some(Self::Cas),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Cas => "cas",
        }
    }
}

/// A validated storage command header. The data block follows on the wire
/// and is read separately by the connection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCommand {
    pub verb: StorageVerb,
    pub key: String,
    pub flags: u16,
    /// Raw wire exptime; canonicalized to an instant at store time.
    pub exptime: i64,
    /// Declared data block length in bytes.
    pub length: usize,
    /// Present only for `cas`.
    pub cas_token: Option<u64>,
    /// Suppress the reply line for this command.
    pub noreply: bool,
}

/// A validated retrieval command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalCommand {
    pub keys: Vec<String>,
    /// `gets` includes the CAS token in each VALUE line.
    pub with_cas: bool,
}

/// Any parsed, validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Storage(StorageCommand),
    Retrieval(RetrievalCommand),
}

/// One `VALUE` line plus its data block in a retrieval reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub key: String,
    pub flags: u16,
    pub data: Bytes,
    /// Included only for `gets`.
    pub cas: Option<u64>,
}

/// A response to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Stored,
    NotStored,
    Exists,
    NotFound,
    /// Unknown command name.
    Error,
    ClientError(ClientError),
    /// Retrieval result: the found values followed by `END`.
    Values(Vec<Value>),
}

impl Reply {
    /// Serializes the reply to its wire bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Stored => extend_line(buf, b"STORED"),
            Reply::NotStored => extend_line(buf, b"NOT_STORED"),
            Reply::Exists => extend_line(buf, b"EXISTS"),
            Reply::NotFound => extend_line(buf, b"NOT_FOUND"),
            Reply::Error => extend_line(buf, b"ERROR"),
            Reply::ClientError(err) => {
                extend_line(buf, format!("CLIENT_ERROR {}", err).as_bytes())
            }
            Reply::Values(values) => {
                for value in values {
                    let header = match value.cas {
                        Some(cas) => format!(
                            "VALUE {} {} {} {}",
                            value.key,
                            value.flags,
                            value.data.len(),
                            cas
                        ),
                        None => {
                            format!("VALUE {} {} {}", value.key, value.flags, value.data.len())
                        }
                    };
                    extend_line(buf, header.as_bytes());
                    buf.extend_from_slice(&value.data);
                    buf.extend_from_slice(CRLF);
                }
                extend_line(buf, b"END");
            }
        }
    }
}

fn extend_line(buf: &mut Vec<u8>, line: &[u8]) {
    buf.extend_from_slice(line);
    buf.extend_from_slice(CRLF);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_replies() {
        assert_eq!(Reply::Stored.serialize(), b"STORED\r\n");
        assert_eq!(Reply::NotStored.serialize(), b"NOT_STORED\r\n");
        assert_eq!(Reply::Exists.serialize(), b"EXISTS\r\n");
        assert_eq!(Reply::NotFound.serialize(), b"NOT_FOUND\r\n");
        assert_eq!(Reply::Error.serialize(), b"ERROR\r\n");
    }

    #[test]
    fn test_client_error_reply() {
        let reply = Reply::ClientError(ClientError::KeysNotProvided);
        assert_eq!(reply.serialize(), b"CLIENT_ERROR <key>* must be provided\r\n");
    }

    #[test]
    fn test_empty_values_reply_is_just_end() {
        assert_eq!(Reply::Values(vec![]).serialize(), b"END\r\n");
    }

    #[test]
    fn test_value_line_without_cas() {
        let reply = Reply::Values(vec![Value {
            key: "foo".to_string(),
            flags: 5,
            data: Bytes::from("bar"),
            cas: None,
        }]);
        assert_eq!(reply.serialize(), b"VALUE foo 5 3\r\nbar\r\nEND\r\n");
    }

    #[test]
    fn test_value_line_with_cas() {
        let reply = Reply::Values(vec![Value {
            key: "foo".to_string(),
            flags: 0,
            data: Bytes::from("bar"),
            cas: Some(42),
        }]);
        assert_eq!(reply.serialize(), b"VALUE foo 0 3 42\r\nbar\r\nEND\r\n");
    }

    #[test]
    fn test_multiple_values_keep_order() {
        let reply = Reply::Values(vec![
            Value {
                key: "k1".to_string(),
                flags: 1,
                data: Bytes::from("v1"),
                cas: None,
            },
            Value {
                key: "k3".to_string(),
                flags: 3,
                data: Bytes::from("v3"),
                cas: None,
            },
        ]);
        assert_eq!(
            reply.serialize(),
            b"VALUE k1 1 2\r\nv1\r\nVALUE k3 3 2\r\nv3\r\nEND\r\n"
        );
    }

    #[test]
    fn test_empty_data_block_value() {
        let reply = Reply::Values(vec![Value {
            key: "empty".to_string(),
            flags: 1,
            data: Bytes::new(),
            cas: None,
        }]);
        assert_eq!(reply.serialize(), b"VALUE empty 1 0\r\n\r\nEND\r\n");
    }

    #[test]
    fn test_binary_safe_data_block() {
        let reply = Reply::Values(vec![Value {
            key: "bin".to_string(),
            flags: 0,
            data: Bytes::from(&b"he\x00llo"[..]),
            cas: None,
        }]);
        assert_eq!(reply.serialize(), b"VALUE bin 0 6\r\nhe\x00llo\r\nEND\r\n");
    }

    #[test]
    fn test_storage_verb_tokens() {
        assert_eq!(StorageVerb::from_token("set"), Some(StorageVerb::Set));
        assert_eq!(StorageVerb::from_token("cas"), Some(StorageVerb::Cas));
        assert_eq!(StorageVerb::from_token("SET"), None);
        assert_eq!(StorageVerb::from_token("delete"), None);
        assert_eq!(StorageVerb::Prepend.as_str(), "prepend");
    }
}
