//! CallWatch Core Library
//!
//! In-process API call monitoring for instrumented applications.
//!
//! # Features
//!
//! - **Call Log**: Thread-safe buffer of intercepted calls, drained by a controller
//! - **Monitor Server**: Loopback TCP server answering `checkConnection`, `getLogs`,
//!   `getTime` and `close`
//! - **Policy Engine**: Tab-separated rules deciding Allow, Deny or Mock per call
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use callwatch_core::{Agent, Config, StaticContext};
//!
//! let agent = Agent::launch(Config::default()).expect("Failed to build agent");
//! agent.init(Arc::new(StaticContext::new("com.example.app")));
//! agent.record_log("TId:1;objCls:'android.net.Uri';mthd:'parse'");
//! ```

uniffi::setup_scaffolding!();

pub mod agent;
pub mod bootstrap;
pub mod client;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod ffi;
pub mod hook;
pub mod log_buffer;
pub mod monitor;
pub mod payload;
pub mod policy;
pub mod protocol;
pub mod server;

// Re-export commonly used types
pub use agent::Agent;
pub use bootstrap::{start_first_available, start_monitor_server};
pub use client::MonitorClient;
pub use clock::{MonotonicClock, MONITOR_TIME_FORMAT};
pub use config::{Config, LoggingConfig, PolicyConfig, ServerConfig, DEFAULT_SERVER_PORTS};
pub use context::{AppContext, ContextSlot, StaticContext};
pub use error::{ConfigError, CoreError, PolicyError, ProtocolError, ServerError};
pub use hook::{ApiHook, NoopHook};
pub use log_buffer::{LogBuffer, LogEntry, AGENT_TAG, SERVER_TAG};
pub use monitor::MonitorHandler;
pub use payload::{escape_enclosings, trim_to_log_size, ApiCallRecord};
pub use policy::{ApiPolicyRule, PolicyEngine, PolicyTable, Verdict};
pub use protocol::{Command, Response, ResponseRow};
pub use server::{FnHandler, RequestHandler, ServerHandle, ServerOptions, TcpServer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
