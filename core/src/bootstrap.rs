//! Port selection for the monitor server
//!
//! Candidate ports are tried strictly in order; the first one that binds
//! wins and later candidates are never touched.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::log_buffer::AGENT_TAG;
use crate::monitor::MonitorHandler;
use crate::server::{ServerHandle, TcpServer};
use std::sync::Arc;

/// Call `try_start` on each port until one yields a value.
///
/// `Ok(None)` from `try_start` means "port taken, try the next one"; an
/// `Err` aborts the search immediately.
pub fn start_first_available<T, F>(ports: &[u16], mut try_start: F) -> Result<(u16, T), ServerError>
where
    F: FnMut(u16) -> Result<Option<T>, ServerError>,
{
    for &port in ports {
        if let Some(started) = try_start(port)? {
            return Ok((port, started));
        }
    }

    Err(ServerError::NoPortsAvailable {
        ports: ports.to_vec(),
    })
}

/// Start a monitor server on the first free configured port
pub fn start_monitor_server(
    handler: Arc<MonitorHandler>,
    config: &ServerConfig,
) -> Result<ServerHandle, ServerError> {
    log::trace!(target: AGENT_TAG, "startMonitorServer(): entering");

    let server = TcpServer::with_options(handler, config.options());
    let (port, handle) = start_first_available(&config.ports, |port| server.try_start(port))?;

    log::debug!(
        target: AGENT_TAG,
        "startMonitorServer(): SUCCESS portUsed: {} PID: {}",
        port,
        std::process::id()
    );
    Ok(handle)
}
