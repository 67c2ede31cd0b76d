//! FFI module for UniFFI host bindings
//!
//! Exposes the agent to host runtimes (Kotlin, Swift) as a single
//! `MonitorAgent` object plus a couple of free functions.

use crate::agent::Agent;
use crate::config::Config;
use crate::context::StaticContext;
use crate::error::CoreError;
use crate::log_buffer::LogEntry;
use crate::policy::{PolicyTable, Verdict};
use std::path::Path;
use std::sync::Arc;

// ─── FFI Enum Types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiVerdict {
    Allow,
    Deny,
    Mock,
}

// ─── FFI Record Types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct FfiLogEntry {
    pub process_id: String,
    pub timestamp: String,
    pub payload: String,
}

// ─── FFI Error Type ───────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum FfiError {
    #[error("Config error: {message}")]
    Config { message: String },
    #[error("Server error: {message}")]
    Server { message: String },
    #[error("Policy error: {message}")]
    Policy { message: String },
    #[error("IO error: {message}")]
    Io { message: String },
    #[error("{message}")]
    Other { message: String },
}

// ─── From Conversions ─────────────────────────────────────────────────────────

impl From<Verdict> for FfiVerdict {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Allow => FfiVerdict::Allow,
            Verdict::Deny => FfiVerdict::Deny,
            Verdict::Mock => FfiVerdict::Mock,
        }
    }
}

impl From<LogEntry> for FfiLogEntry {
    fn from(entry: LogEntry) -> Self {
        FfiLogEntry {
            process_id: entry.process_id,
            timestamp: entry.timestamp,
            payload: entry.payload,
        }
    }
}

impl From<CoreError> for FfiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config(e) => FfiError::Config {
                message: e.to_string(),
            },
            CoreError::Server(e) => FfiError::Server {
                message: e.to_string(),
            },
            CoreError::Policy(e) => FfiError::Policy {
                message: e.to_string(),
            },
            CoreError::Io(e) => FfiError::Io {
                message: e.to_string(),
            },
            other => FfiError::Other {
                message: other.to_string(),
            },
        }
    }
}

// ─── Exported Functions ───────────────────────────────────────────────────────

#[uniffi::export]
pub fn get_version() -> String {
    crate::VERSION.to_string()
}

/// Parse a policy file and return its rule count
#[uniffi::export]
pub fn validate_policy_file(path: String) -> Result<u32, FfiError> {
    let table = PolicyTable::load(Path::new(&path)).map_err(CoreError::from)?;
    Ok(table.len() as u32)
}

// ─── MonitorAgent Object ──────────────────────────────────────────────────────

#[derive(uniffi::Object)]
pub struct MonitorAgent {
    agent: Agent,
}

#[uniffi::export]
impl MonitorAgent {
    /// Load configuration (default path when `config_path` is `None`) and
    /// start the monitor server. A server that cannot start is logged and
    /// left unset.
    #[uniffi::constructor]
    pub fn new(config_path: Option<String>) -> Result<Self, FfiError> {
        let config = match config_path {
            Some(path) => Config::load_from_path(Path::new(&path))?,
            None => Config::load()?,
        };
        let agent = Agent::launch(config)?;
        Ok(MonitorAgent { agent })
    }

    pub fn init(&self, package_name: String) {
        self.agent.init(Arc::new(StaticContext::new(package_name)));
    }

    pub fn record_log(&self, payload: String) {
        self.agent.record_log(payload);
    }

    pub fn get_policy(&self, method: String, resources: Vec<String>) -> FfiVerdict {
        self.agent.get_policy(&method, resources.as_slice()).into()
    }

    pub fn server_port(&self) -> Option<u16> {
        self.agent.server_port()
    }

    /// Entries waiting for the controller, left in place
    pub fn pending_logs(&self) -> Vec<FfiLogEntry> {
        self.agent
            .logs()
            .snapshot()
            .into_iter()
            .map(FfiLogEntry::from)
            .collect()
    }

    pub fn shutdown(&self) {
        self.agent.shutdown();
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
