//! Monitor request handler
//!
//! Answers the four controller commands from the shared [`LogBuffer`]. The
//! buffer lock is held for the whole dispatch, so a drain can never
//! interleave with the self-log validation or with another command.

use crate::context::ContextSlot;
use crate::log_buffer::{assert_not_from_monitor, LogBuffer, SERVER_TAG};
use crate::protocol::{Command, Response, ResponseRow};
use crate::server::RequestHandler;
use std::sync::Arc;

/// [`RequestHandler`] serving the call log to the controller
#[derive(Debug, Clone)]
pub struct MonitorHandler {
    logs: Arc<LogBuffer>,
    context: Arc<ContextSlot>,
}

impl MonitorHandler {
    /// Create a handler over a shared buffer and context slot
    pub fn new(logs: Arc<LogBuffer>, context: Arc<ContextSlot>) -> Self {
        Self { logs, context }
    }

    /// Buffer drained by `getLogs`
    pub fn logs(&self) -> &Arc<LogBuffer> {
        &self.logs
    }

    /// Dispatch one command token
    pub fn handle(&self, input: &str) -> Response {
        let mut entries = self.logs.lock();

        match Command::parse(input) {
            Some(Command::ConnectionCheck) => {
                assert_not_from_monitor(&entries);
                vec![ResponseRow::full(
                    std::process::id().to_string(),
                    self.context.package_name(),
                    "",
                )]
            }
            Some(Command::GetLogs) => {
                assert_not_from_monitor(&entries);
                std::mem::take(&mut *entries)
                    .into_iter()
                    .map(ResponseRow::from)
                    .collect()
            }
            Some(Command::GetTime) => {
                let time = self.logs.clock().now_formatted();
                log::debug!(target: SERVER_TAG, "getTime: {}", time);
                vec![ResponseRow::single(time)]
            }
            Some(Command::Close) => Vec::new(),
            None => {
                log::error!(
                    target: SERVER_TAG,
                    "! Unexpected command from controller. The command: {}",
                    input
                );
                Vec::new()
            }
        }
    }
}

impl RequestHandler for MonitorHandler {
    type Request = String;
    type Response = Response;

    fn on_request(&self, request: &String) -> Response {
        self.handle(request)
    }

    fn should_close(&self, request: &String) -> bool {
        Command::parse(request) == Some(Command::Close)
    }
}
