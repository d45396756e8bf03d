//! Command-line parsing for the text protocol.
//!
//! The connection layer hands this module one already-delimited command line
//! (CRLF stripped). The line is split on whitespace and turned into a typed
//! [`Command`], applying the validation checks in protocol order:
//! argument count first, then key, flags, exptime, length and (for `cas`)
//! the token, failing fast on the first violation. The data block of a
//! storage command is NOT read here; the caller reads it afterwards using
//! the declared length from the returned header.
//!
//! `noreply` handling follows the protocol's asymmetry: the flag is
//! recognized right after the argument-count check, so later validation
//! failures on a `noreply` command are computed but not replied to, while an
//! argument-count failure itself is always replied to (the flag could not
//! have been seen yet).

use crate::protocol::types::{Command, RetrievalCommand, StorageCommand, StorageVerb};
use crate::protocol::validate::{
    self, ClientError, MAX_DATA_BLOCK_LENGTH,
};

/// The trailing token that suppresses the reply line.
const NOREPLY: &str = "noreply";

/// Why a command line did not produce a typed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// The command name is not part of the protocol; answered with a bare
    /// `ERROR` line.
    UnknownCommand,
    /// A validation violation.
    Invalid {
        error: ClientError,
        /// Whether `noreply` had been recognized before the error occurred;
        /// if so the reply is suppressed.
        noreply: bool,
        /// Declared data-block length, when the length token of a storage
        /// command parsed. Lets the connection drain an already-sent block
        /// so the stream stays aligned.
        drain: Option<usize>,
    },
}

impl ParseFailure {
    fn invalid(error: ClientError) -> Self {
        Self::Invalid {
            error,
            noreply: false,
            drain: None,
        }
    }
}

/// Parses one command line into a typed command.
pub fn parse_command_line(line: &str) -> Result<Command, ParseFailure> {
    let tokens: Vec<&str> = line.split_ascii_whitespace().collect();

    let name = match tokens.first() {
        Some(name) => *name,
        None => return Err(ParseFailure::UnknownCommand),
    };

    if let Some(verb) = StorageVerb::from_token(name) {
        return parse_storage(verb, &tokens).map(Command::Storage);
    }
    match name {
        "get" => parse_retrieval(&tokens, false).map(Command::Retrieval),
        "gets" => parse_retrieval(&tokens, true).map(Command::Retrieval),
        _ => Err(ParseFailure::UnknownCommand),
    }
}

/// `<verb> <key> <flags> <exptime> <length> [<cas_unique>] [noreply]`
fn parse_storage(verb: StorageVerb, tokens: &[&str]) -> Result<StorageCommand, ParseFailure> {
    // Token count including the command name; cas carries one extra.
    let required = if verb == StorageVerb::Cas { 6 } else { 5 };

    validate::require_min_tokens(tokens, required).map_err(ParseFailure::invalid)?;

    // From here on noreply is known, so later failures can be suppressed.
    let noreply = tokens.len() == required + 1 && tokens[required] == NOREPLY;

    // The length token may still be usable for draining even if another
    // check fails first.
    let drain = validate::parse_length(tokens[4]).ok();

    let fail = |error: ClientError| ParseFailure::Invalid {
        error,
        noreply,
        drain,
    };

    if tokens.len() > required + usize::from(noreply) {
        return Err(fail(ClientError::TooManyArguments));
    }

    validate::validate_key(tokens[1]).map_err(fail)?;
    let flags = validate::parse_flags(tokens[2]).map_err(fail)?;
    let exptime = validate::parse_exptime(tokens[3]).map_err(fail)?;
    let length = validate::parse_length(tokens[4]).map_err(fail)?;
    if length > MAX_DATA_BLOCK_LENGTH {
        return Err(fail(ClientError::DataBlockTooLong));
    }
    let cas_token = match verb {
        StorageVerb::Cas => Some(validate::parse_cas_token(tokens[5]).map_err(fail)?),
        _ => None,
    };

    Ok(StorageCommand {
        verb,
        key: tokens[1].to_string(),
        flags,
        exptime,
        length,
        cas_token,
        noreply,
    })
}

/// `get|gets <key>+`
fn parse_retrieval(tokens: &[&str], with_cas: bool) -> Result<RetrievalCommand, ParseFailure> {
    let keys = &tokens[1..];
    if keys.is_empty() {
        return Err(ParseFailure::invalid(ClientError::KeysNotProvided));
    }
    for key in keys {
        validate::validate_key(key).map_err(ParseFailure::invalid)?;
    }
    Ok(RetrievalCommand {
        keys: keys.iter().map(|k| k.to_string()).collect(),
        with_cas,
    })
}
