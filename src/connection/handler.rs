//! Per-connection request loop.
//!
//! Each accepted client gets one task running `ConnectionHandler::run`. TCP
//! is a stream, so incoming data is accumulated in a `BytesMut` buffer and
//! consumed line by line: a command line first, then (for storage commands)
//! the raw data block up to its CRLF terminator.
//!
//! ## Stream alignment
//!
//! A storage command whose header fails validation may still be followed by
//! its data block on the wire. Whatever portion of that block has already
//! arrived is drained from the buffer (never blocking for more) so the next
//! command line is not misread as data. A block that does not match its
//! declared length is consumed through its terminating CRLF before the
//! error is reported, for the same reason.
//!
//! Client errors are replies, not connection failures: the loop keeps
//! serving after every `CLIENT_ERROR`. Only I/O failures and EOF end the
//! task, and they affect nothing but this one connection.

use crate::commands::CommandHandler;
use crate::protocol::types::{Command, Reply};
use crate::protocol::validate::{self, ClientError};
use crate::protocol::{parse_command_line, ParseFailure, MAX_DATA_BLOCK_LENGTH};
use bytes::{Buf, Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Maximum length of a single command line (64 KB).
const MAX_COMMAND_LINE_LENGTH: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Client disconnected between commands
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Stream ended in the middle of a command or data block
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// A single line exceeded the buffer limit
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Command executor backed by the shared engine
    commands: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        commands: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            commands,
            stats,
        }
    }

    /// Runs the request loop until the client goes away.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// The read-parse-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let line = self.read_line(MAX_COMMAND_LINE_LENGTH).await?;
            let reply = self.process_line(&line).await?;
            self.stats.command_processed();

            if let Some(reply) = reply {
                self.send_reply(&reply).await?;
            }
        }
    }

    /// Handles one command line. Returns `None` when the reply is
    /// suppressed by `noreply`.
    async fn process_line(&mut self, raw: &[u8]) -> Result<Option<Reply>, ConnectionError> {
        // The line reader stops at `\n`; the protocol demands `\r\n`.
        if !raw.ends_with(b"\r\n") {
            warn!(client = %self.addr, "Command line not CRLF-terminated");
            return Ok(Some(Reply::ClientError(ClientError::BadTermination)));
        }
        let line = String::from_utf8_lossy(&raw[..raw.len() - 2]);

        match parse_command_line(&line) {
            Ok(Command::Retrieval(cmd)) => {
                trace!(client = %self.addr, keys = cmd.keys.len(), "Retrieval command");
                Ok(Some(self.commands.retrieval_command(&cmd)))
            }
            Ok(Command::Storage(cmd)) => {
                let reply = match self.read_data_block(cmd.length).await? {
                    Ok(data) => self.commands.storage_command(&cmd, data),
                    Err(client_error) => {
                        warn!(client = %self.addr, error = %client_error, "Bad data block");
                        Reply::ClientError(client_error)
                    }
                };
                Ok((!cmd.noreply).then_some(reply))
            }
            Err(ParseFailure::UnknownCommand) => {
                debug!(client = %self.addr, line = %line, "Unknown command");
                Ok(Some(Reply::Error))
            }
            Err(ParseFailure::Invalid {
                error,
                noreply,
                drain,
            }) => {
                warn!(client = %self.addr, error = %error, "Invalid command");
                // The rejected command's data block may already be in the
                // buffer; discard it so the next line parses cleanly.
                if let Some(declared) = drain {
                    self.drain_buffered(declared + 2);
                }
                Ok((!noreply).then_some(Reply::ClientError(error)))
            }
        }
    }

    /// Reads the data block of a storage command: `declared` bytes plus the
    /// CRLF terminator.
    ///
    /// The block is accumulated in whole wire lines, so a block that is
    /// longer or shorter than declared is still consumed up to a line
    /// boundary before the mismatch error is returned, keeping the stream
    /// aligned on the next command.
    async fn read_data_block(
        &mut self,
        declared: usize,
    ) -> Result<Result<Bytes, ClientError>, ConnectionError> {
        let mut block = BytesMut::with_capacity(declared + 2);
        while block.len() < declared + 2 {
            let line = match self.read_line(MAX_DATA_BLOCK_LENGTH + 2).await {
                Ok(line) => line,
                // EOF inside a data block is never a clean close.
                Err(ConnectionError::ClientDisconnected) => {
                    return Err(ConnectionError::UnexpectedEof)
                }
                Err(e) => return Err(e),
            };
            block.extend_from_slice(&line);
        }

        if !block.ends_with(b"\r\n") {
            return Ok(Err(ClientError::BadTermination));
        }
        let actual = block.len() - 2;
        if let Err(e) = validate::validate_data_block(declared, actual) {
            return Ok(Err(e));
        }
        block.truncate(actual);
        Ok(Ok(block.freeze()))
    }

    /// Reads one line, up through its `\n`, buffering as needed.
    async fn read_line(&mut self, limit: usize) -> Result<Bytes, ConnectionError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                return Ok(self.buffer.split_to(pos + 1).freeze());
            }

            if self.buffer.len() >= limit {
                warn!(
                    client = %self.addr,
                    size = self.buffer.len(),
                    "Line exceeds buffer limit"
                );
                return Err(ConnectionError::BufferFull);
            }

            self.read_more_data().await?;
        }
    }

    /// Discards up to `limit` already-buffered bytes without blocking.
    fn drain_buffered(&mut self, limit: usize) {
        let n = limit.min(self.buffer.len());
        if n > 0 {
            trace!(client = %self.addr, drained = n, "Drained stale data block bytes");
            self.buffer.advance(n);
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            // Connection closed by client
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Sends a reply to the client.
    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Sent reply");
        Ok(())
    }
}

/// Handles a client connection to completion.
///
/// Convenience wrapper used by the accept loop; downgrades expected
/// disconnect errors to debug logs.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    commands: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, commands, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
