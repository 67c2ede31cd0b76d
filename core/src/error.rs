//! Unified error types for CallWatch Core
//!
//! Structured error types for configuration, the monitor server, the wire
//! protocol and the policy file.

use std::path::PathBuf;
use thiserror::Error;

/// Core library error type
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration file errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Server startup errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Policy file errors
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeToml(#[from] toml::ser::Error),

    /// Failed to write config file
    #[error("Failed to write config file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Home directory not found
    #[error("Could not determine home directory")]
    NoHomeDir,

    /// Failed to create directory
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors raised while starting a monitor server.
///
/// Address-in-use is not an error: `TcpServer::try_start` reports it as
/// `Ok(None)` so the bootstrapper can move on to the next port.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Bind failed for a reason other than the port being taken
    #[error("Failed to bind monitor server on port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    /// The accept-loop thread could not be spawned
    #[error("Failed to spawn server thread for port {port}: {source}")]
    Spawn {
        port: u16,
        source: std::io::Error,
    },

    /// The accept-loop thread exited before reporting its bind outcome
    #[error("Server thread for port {port} exited before completing the startup handshake")]
    Handshake { port: u16 },

    /// Every candidate port was already in use
    #[error("No available ports among {ports:?}")]
    NoPortsAvailable { ports: Vec<u16> },
}

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Socket read or write failed (includes read timeouts)
    #[error("Socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize a frame body
    #[error("Failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    /// Frame body was not valid for the expected type
    #[error("Failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// Peer did not start the stream with the expected magic bytes
    #[error("Bad stream header: {0:?}")]
    BadHeader([u8; 4]),

    /// Peer speaks a protocol version we do not understand
    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// Frame length prefix exceeds the configured limit
    #[error("Frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
}

/// Policy file errors
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Failed to read the policy file
    #[error("Failed to read policy file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A rule line ends with something other than Allow, Deny or Mock
    #[error("Invalid verdict {value:?} on policy line {line}")]
    InvalidVerdict { line: usize, value: String },
}

/// Convenience type alias
pub type Result<T> = std::result::Result<T, CoreError>;
