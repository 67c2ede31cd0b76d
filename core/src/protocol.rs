//! Wire protocol between the monitor server and its controller
//!
//! One exchange per TCP connection:
//!
//! 1. server sends the stream header (`CWMN` + version) and flushes it,
//! 2. client sends one request frame holding a command token,
//! 3. server answers with one frame holding a list of [`ResponseRow`]s.
//!
//! A frame is a big-endian `u32` length followed by a JSON body.

use crate::error::ProtocolError;
use crate::log_buffer::LogEntry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Magic bytes opening every server stream
pub const STREAM_MAGIC: [u8; 4] = *b"CWMN";

/// Current protocol version
pub const PROTOCOL_VERSION: u16 = 1;

/// Commands understood by the monitor server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Liveness check; answered with pid and package name
    ConnectionCheck,
    /// Drain the log buffer
    GetLogs,
    /// Current monitor time
    GetTime,
    /// Close the server after answering
    Close,
}

impl Command {
    /// All commands, in protocol order
    pub const ALL: [Command; 4] = [
        Command::ConnectionCheck,
        Command::GetLogs,
        Command::GetTime,
        Command::Close,
    ];

    /// Wire token of this command
    pub fn token(&self) -> &'static str {
        match self {
            Command::ConnectionCheck => "checkConnection",
            Command::GetLogs => "getLogs",
            Command::GetTime => "getTime",
            Command::Close => "close",
        }
    }

    /// Parse a wire token; unknown tokens yield `None`
    pub fn parse(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.token() == token)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// One response row: always three columns, each possibly null
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRow(pub Option<String>, pub Option<String>, pub Option<String>);

impl ResponseRow {
    /// Row with all three columns present
    pub fn full(a: impl Into<String>, b: impl Into<String>, c: impl Into<String>) -> Self {
        Self(Some(a.into()), Some(b.into()), Some(c.into()))
    }

    /// Row with only the first column present
    pub fn single(a: impl Into<String>) -> Self {
        Self(Some(a.into()), None, None)
    }

    /// Columns as string slices
    pub fn columns(&self) -> [Option<&str>; 3] {
        [self.0.as_deref(), self.1.as_deref(), self.2.as_deref()]
    }
}

impl From<LogEntry> for ResponseRow {
    fn from(entry: LogEntry) -> Self {
        Self::full(entry.process_id, entry.timestamp, entry.payload)
    }
}

/// Full server answer
pub type Response = Vec<ResponseRow>;

/// Write the stream header. Callers flush it before waiting on input.
pub fn write_stream_header<W: Write>(writer: &mut W) -> Result<(), ProtocolError> {
    writer.write_all(&STREAM_MAGIC)?;
    writer.write_all(&PROTOCOL_VERSION.to_be_bytes())?;
    Ok(())
}

/// Read and check the stream header
pub fn read_stream_header<R: Read>(reader: &mut R) -> Result<(), ProtocolError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != STREAM_MAGIC {
        return Err(ProtocolError::BadHeader(magic));
    }

    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    let version = u16::from_be_bytes(version);
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    Ok(())
}

/// Serialize `value` into one length-prefixed frame
pub fn write_frame<W: Write, T: Serialize + ?Sized>(
    writer: &mut W,
    value: &T,
) -> Result<(), ProtocolError> {
    let body = serde_json::to_vec(value).map_err(ProtocolError::Encode)?;
    let len = u32::try_from(body.len()).map_err(|_| ProtocolError::FrameTooLarge {
        len: body.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&body)?;
    Ok(())
}

/// Read one frame and deserialize it, rejecting bodies over `max_len` bytes
pub fn read_frame<R: Read, T: DeserializeOwned>(
    reader: &mut R,
    max_len: usize,
) -> Result<T, ProtocolError> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > max_len {
        return Err(ProtocolError::FrameTooLarge { len, max: max_len });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    serde_json::from_slice(&body).map_err(ProtocolError::Decode)
}
