//! Shared buffer of intercepted-call log entries
//!
//! Writers are arbitrary host threads calling [`LogBuffer::record`]; the only
//! reader is the monitor server, which drains the buffer on `getLogs`. Every
//! access goes through one mutex.

use crate::clock::MonotonicClock;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Log target of the monitor server's own diagnostics
pub const SERVER_TAG: &str = "CallWatch_server";

/// Log target of the agent's own diagnostics
pub const AGENT_TAG: &str = "CallWatch_agent";

/// One recorded API call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Process that made the call
    pub process_id: String,
    /// Monitor timestamp, see [`crate::clock::MONITOR_TIME_FORMAT`]
    pub timestamp: String,
    /// Call description (method, parameters, stack trace, ...)
    pub payload: String,
}

impl LogEntry {
    /// Create a new entry
    pub fn new(
        process_id: impl Into<String>,
        timestamp: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            process_id: process_id.into(),
            timestamp: timestamp.into(),
            payload: payload.into(),
        }
    }

    /// Whether the payload carries one of the monitor's own log tags
    pub fn is_from_monitor(&self) -> bool {
        payload_is_from_monitor(&self.payload)
    }
}

fn payload_is_from_monitor(payload: &str) -> bool {
    payload.contains(SERVER_TAG) || payload.contains(AGENT_TAG)
}

/// Panic if any entry was logged by the monitor about itself.
///
/// Such an entry means the monitor is feeding its own diagnostics back into
/// the call log, which corrupts the stream sent to the controller.
pub fn assert_not_from_monitor(entries: &[LogEntry]) {
    for entry in entries {
        assert!(
            !entry.is_from_monitor(),
            "Attempt to log a message whose payload contains {} or {}. The message payload: {}",
            SERVER_TAG,
            AGENT_TAG,
            entry.payload
        );
    }
}

/// Mutex-guarded, insertion-ordered log of API calls
#[derive(Debug, Default)]
pub struct LogBuffer {
    entries: Mutex<Vec<LogEntry>>,
    clock: MonotonicClock,
}

impl LogBuffer {
    /// Create an empty buffer with a freshly anchored clock
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }

    /// Create an empty buffer using the given clock
    pub fn with_clock(clock: MonotonicClock) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Clock used to timestamp entries
    pub fn clock(&self) -> &MonotonicClock {
        &self.clock
    }

    /// Record a call made by the current process.
    ///
    /// The timestamp is taken while holding the lock, so entries are ordered
    /// by timestamp as well as by insertion.
    ///
    /// # Panics
    /// If the payload contains [`SERVER_TAG`] or [`AGENT_TAG`].
    pub fn record(&self, payload: impl Into<String>) -> LogEntry {
        let payload = payload.into();
        assert!(
            !payload_is_from_monitor(&payload),
            "Attempt to log a message whose payload contains {} or {}. The message payload: {}",
            SERVER_TAG,
            AGENT_TAG,
            payload
        );

        let mut entries = self.lock();
        let entry = LogEntry::new(
            std::process::id().to_string(),
            self.clock.now_formatted(),
            payload,
        );
        entries.push(entry.clone());
        entry
    }

    /// Append an already built entry.
    ///
    /// # Panics
    /// If the payload contains [`SERVER_TAG`] or [`AGENT_TAG`].
    pub fn push(&self, entry: LogEntry) {
        assert_not_from_monitor(std::slice::from_ref(&entry));
        self.lock().push(entry);
    }

    /// Number of buffered entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the buffered entries, leaving the buffer untouched
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    /// Take every buffered entry, leaving the buffer empty
    pub fn drain(&self) -> Vec<LogEntry> {
        let mut entries = self.lock();
        assert_not_from_monitor(&entries);
        std::mem::take(&mut *entries)
    }

    /// Hold the buffer lock across a multi-step operation.
    ///
    /// A panic in another holder does not make the buffer unusable: the
    /// poisoned guard is recovered.
    pub fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
