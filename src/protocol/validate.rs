//! Stateless validation of raw wire tokens.
//!
//! Every function here is a pure check over a string token taken from a
//! command line, failing with a specific [`ClientError`]. Nothing in this
//! module touches the cache or the connection; the parser composes these
//! checks in the protocol-mandated order and the connection layer renders
//! the errors as `CLIENT_ERROR <message>` lines.

use thiserror::Error;

/// Maximum key length in bytes.
pub const MAX_KEY_LENGTH: usize = 250;

/// Maximum data block length: 1 MiB.
pub const MAX_DATA_BLOCK_LENGTH: usize = 1 << 20;

/// Client-facing protocol violations. Recoverable: the offending command is
/// aborted and the connection keeps serving.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("The command has too few arguments")]
    TooFewArguments,

    #[error("The command has too many arguments")]
    TooManyArguments,

    #[error("<key> must be provided")]
    KeyNotProvided,

    /// Retrieval commands need at least one key.
    #[error("<key>* must be provided")]
    KeysNotProvided,

    #[error("<key> must not include control characters")]
    KeyWithControlChars,

    #[error("<key> has more than 250 characters")]
    KeyTooLong,

    #[error("<flags> is not a 16-bit unsigned integer")]
    FlagsNotUnsigned16,

    #[error("<exptime> is not an integer")]
    ExptimeNotInteger,

    #[error("<length> is not an unsigned integer")]
    LengthNotUnsigned,

    #[error("<cas_unique> is not a 64-bit unsigned integer")]
    CasTokenNotUnsigned64,

    #[error("<data_block> has more than 1048576 characters")]
    DataBlockTooLong,

    /// The cache budget itself is smaller than this block; eviction cannot
    /// help.
    #[error("<data_block> is larger than the cache capacity")]
    DataBlockOverCapacity,

    #[error("<length> ({declared}) is not equal to the length of the item's data_block ({actual})")]
    DataBlockLengthMismatch { declared: usize, actual: usize },

    #[error("Commands must be terminated by \"\\r\\n\"")]
    BadTermination,
}

/// Checks a key token: non-empty, no control characters, at most 250 bytes.
pub fn validate_key(key: &str) -> Result<(), ClientError> {
    if key.is_empty() {
        return Err(ClientError::KeyNotProvided);
    }
    if key.bytes().any(|b| b <= 0x1F) {
        return Err(ClientError::KeyWithControlChars);
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(ClientError::KeyTooLong);
    }
    Ok(())
}

/// Parses an exptime token: optional sign followed by digits.
pub fn parse_exptime(token: &str) -> Result<i64, ClientError> {
    let digits = token
        .strip_prefix(|c| c == '+' || c == '-')
        .unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ClientError::ExptimeNotInteger);
    }
    token.parse().map_err(|_| ClientError::ExptimeNotInteger)
}

/// Parses a flags token: unsigned integer fitting 16 bits.
pub fn parse_flags(token: &str) -> Result<u16, ClientError> {
    parse_unsigned(token).map_err(|_| ClientError::FlagsNotUnsigned16)
}

/// Parses a length token: unsigned integer.
pub fn parse_length(token: &str) -> Result<usize, ClientError> {
    parse_unsigned(token).map_err(|_| ClientError::LengthNotUnsigned)
}

/// Parses a cas token: unsigned integer fitting 64 bits.
pub fn parse_cas_token(token: &str) -> Result<u64, ClientError> {
    parse_unsigned(token).map_err(|_| ClientError::CasTokenNotUnsigned64)
}

/// Rejects a command line with fewer than `min` tokens.
pub fn require_min_tokens(tokens: &[&str], min: usize) -> Result<(), ClientError> {
    if tokens.len() < min {
        return Err(ClientError::TooFewArguments);
    }
    Ok(())
}

/// Checks that a fully-read data block matches its declared length and fits
/// the protocol cap.
pub fn validate_data_block(declared: usize, actual: usize) -> Result<(), ClientError> {
    if actual > MAX_DATA_BLOCK_LENGTH {
        return Err(ClientError::DataBlockTooLong);
    }
    if actual != declared {
        return Err(ClientError::DataBlockLengthMismatch { declared, actual });
    }
    Ok(())
}

/// Digits-only parse into any unsigned integer type; no sign allowed.
fn parse_unsigned<T: std::str::FromStr>(token: &str) -> Result<T, ()> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(());
    }
    token.parse().map_err(|_| ())
}
