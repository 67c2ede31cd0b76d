//! In-process monitoring agent
//!
//! Owns everything the host's instrumented code talks to: the call log
//! buffer, the policy engine, the host context and the monitor server
//! serving the buffer to the controller.

use crate::bootstrap::start_monitor_server;
use crate::config::Config;
use crate::context::{AppContext, ContextSlot};
use crate::error::{CoreError, ServerError};
use crate::hook::{ApiHook, NoopHook};
use crate::log_buffer::{LogBuffer, AGENT_TAG};
use crate::monitor::MonitorHandler;
use crate::payload::ApiCallRecord;
use crate::policy::{PolicyEngine, Verdict};
use crate::server::ServerHandle;
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// In-process monitor: call log, API policy, host context and monitor server
pub struct Agent {
    config: Config,
    logs: Arc<LogBuffer>,
    context: Arc<ContextSlot>,
    policy: PolicyEngine,
    hook: Arc<dyn ApiHook>,
    server: Mutex<Option<ServerHandle>>,
}

impl Agent {
    /// Build an agent without starting its server
    pub fn new(config: Config) -> Result<Self, CoreError> {
        let policy = PolicyEngine::new(config.policy.effective_file()?);
        Ok(Self {
            config,
            logs: Arc::new(LogBuffer::new()),
            context: Arc::new(ContextSlot::new()),
            policy,
            hook: Arc::new(NoopHook),
            server: Mutex::new(None),
        })
    }

    /// Replace the call hook
    pub fn with_hook(mut self, hook: Arc<dyn ApiHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Build an agent and start its server.
    ///
    /// A server that fails to start is logged, not returned: the agent still
    /// records calls and answers policy lookups.
    pub fn launch(config: Config) -> Result<Self, CoreError> {
        let agent = Self::new(config)?;
        if let Err(e) = agent.start() {
            log::error!(target: AGENT_TAG, "! Monitor server could not be started: {}", e);
        }
        Ok(agent)
    }

    /// Start the monitor server on the first free configured port.
    ///
    /// Returns the bound port. A server already running is replaced.
    pub fn start(&self) -> Result<u16, ServerError> {
        let handler = Arc::new(MonitorHandler::new(
            Arc::clone(&self.logs),
            Arc::clone(&self.context),
        ));
        let handle = start_monitor_server(handler, &self.config.server)?;
        let port = handle.port();
        *self.server() = Some(handle);
        Ok(port)
    }

    /// Supply the host context and initialize the hook
    pub fn init(&self, context: Arc<dyn AppContext>) {
        if !self.is_server_running() {
            log::warn!(
                target: AGENT_TAG,
                "! init(): the monitor server is not running, call logs will not reach the controller"
            );
        }

        self.hook.init(context.as_ref());
        self.context.set(context);
    }

    /// Append a call payload to the log buffer.
    ///
    /// # Panics
    /// If the payload contains one of the reserved log tags.
    pub fn record_log(&self, payload: impl Into<String>) {
        self.logs.record(payload);
    }

    /// Verdict for a call; `Allow` when no rule applies or the policy file
    /// is unusable
    pub fn get_policy<S: AsRef<str>>(&self, method: &str, resources: &[S]) -> Verdict {
        self.policy.get_policy(method, resources)
    }

    /// Log a call and run it between the hook's before/after callbacks
    pub fn intercept<R, F>(&self, record: &ApiCallRecord, call: F) -> R
    where
        R: Any,
        F: FnOnce() -> R,
    {
        let payload = record.to_payload();
        self.record_log(payload.clone());

        self.hook.before_call(&payload);
        let mut result = call();
        self.hook.after_call(&payload, &mut result);
        result
    }

    /// Call log drained by `getLogs`
    pub fn logs(&self) -> &Arc<LogBuffer> {
        &self.logs
    }

    /// Configuration the agent was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Policy engine backing `get_policy`
    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Port of the running server, if any
    pub fn server_port(&self) -> Option<u16> {
        self.server()
            .as_ref()
            .filter(|handle| handle.is_running())
            .map(ServerHandle::port)
    }

    /// Whether the monitor server is still accepting connections
    pub fn is_server_running(&self) -> bool {
        self.server_port().is_some()
    }

    /// Block until the server closes on a controller `close`
    pub fn wait(&self) {
        let handle = self.server().take();
        if let Some(handle) = handle {
            handle.join();
        }
    }

    /// Stop the server and finalize the hook
    pub fn shutdown(&self) {
        let handle = self.server().take();
        if let Some(mut handle) = handle {
            handle.stop();
            log::debug!(target: AGENT_TAG, "Monitor server on port {} stopped", handle.port());
        }
        self.hook.finalize();
    }

    fn server(&self) -> MutexGuard<'_, Option<ServerHandle>> {
        self.server.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("server_port", &self.server_port())
            .field("policy", &self.policy.path())
            .field("context", &self.context)
            .field("buffered", &self.logs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MonitorClient;
    use crate::config::{PolicyConfig, ServerConfig};
    use crate::context::StaticContext;
    use crate::protocol::Command;
    use std::net::{SocketAddr, TcpListener};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir, ports: Vec<u16>) -> Config {
        Config {
            server: ServerConfig {
                ports,
                ..Default::default()
            },
            policy: PolicyConfig {
                file: Some(temp_dir.path().join("api_policies.txt")),
            },
            ..Default::default()
        }
    }

    fn client(port: u16) -> MonitorClient {
        MonitorClient::new(SocketAddr::from(([127, 0, 0, 1], port))).timeout(Duration::from_secs(5))
    }

    #[derive(Default)]
    struct CountingHook {
        inits: AtomicUsize,
        before: AtomicUsize,
        finalized: AtomicUsize,
    }

    impl ApiHook for CountingHook {
        fn init(&self, _context: &dyn AppContext) {
            self.inits.fetch_add(1, Ordering::SeqCst);
        }

        fn before_call(&self, _payload: &str) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }

        fn after_call(&self, _payload: &str, result: &mut dyn Any) {
            if let Some(value) = result.downcast_mut::<i32>() {
                *value *= 10;
            }
        }

        fn finalize(&self) {
            self.finalized.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_init_sets_package_name() {
        let temp_dir = TempDir::new().unwrap();
        let agent = Agent::launch(test_config(&temp_dir, vec![0])).unwrap();
        let port = agent.server_port().expect("server started");

        agent.init(Arc::new(StaticContext::new("com.example.app")));

        let rows = client(port).query(Command::ConnectionCheck).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.as_deref(), Some("com.example.app"));
        agent.shutdown();
    }

    #[test]
    fn test_launch_with_all_ports_busy() {
        let temp_dir = TempDir::new().unwrap();
        let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let agent = Agent::launch(test_config(&temp_dir, vec![port])).unwrap();

        assert!(agent.server_port().is_none());
        // Still usable without a server
        agent.init(Arc::new(StaticContext::new("com.example.app")));
        agent.record_log("offline call");
        assert_eq!(agent.logs().len(), 1);
    }

    #[test]
    fn test_start_reports_no_ports() {
        let temp_dir = TempDir::new().unwrap();
        let agent = Agent::new(test_config(&temp_dir, Vec::new())).unwrap();
        assert!(matches!(agent.start(), Err(ServerError::NoPortsAvailable { .. })));
    }

    #[test]
    fn test_recorded_logs_reach_controller() {
        let temp_dir = TempDir::new().unwrap();
        let agent = Agent::launch(test_config(&temp_dir, vec![0])).unwrap();
        let port = agent.server_port().unwrap();

        agent.record_log("TId:1;objCls:'C';mthd:'m'");
        let rows = client(port).query(Command::GetLogs).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].2.as_deref(), Some("TId:1;objCls:'C';mthd:'m'"));
        assert!(agent.logs().is_empty());
        agent.shutdown();
    }

    #[test]
    fn test_get_policy_reads_configured_file() {
        let temp_dir = TempDir::new().unwrap();
        let agent = Agent::new(test_config(&temp_dir, Vec::new())).unwrap();
        assert_eq!(agent.get_policy("android.foo.bar", &["http://x"]), Verdict::Allow);

        std::fs::write(agent.policy().path(), "android.foo.bar\thttp://x\tDeny\n").unwrap();
        assert_eq!(agent.get_policy("android.foo.bar", &["http://x/path"]), Verdict::Deny);
    }

    #[test]
    fn test_intercept_runs_hook_and_records() {
        let temp_dir = TempDir::new().unwrap();
        let hook = Arc::new(CountingHook::default());
        let agent = Agent::new(test_config(&temp_dir, Vec::new()))
            .unwrap()
            .with_hook(hook.clone());

        let record = ApiCallRecord::new("java.lang.Math", "abs")
            .thread("main")
            .param("int", -4);
        let result = agent.intercept(&record, || 4);

        assert_eq!(result, 40);
        assert_eq!(hook.before.load(Ordering::SeqCst), 1);
        assert_eq!(agent.logs().snapshot()[0].payload, record.to_payload());

        agent.init(Arc::new(StaticContext::new("com.example.app")));
        agent.shutdown();
        assert_eq!(hook.inits.load(Ordering::SeqCst), 1);
        assert_eq!(hook.finalized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_then_wait_returns() {
        let temp_dir = TempDir::new().unwrap();
        let agent = Agent::launch(test_config(&temp_dir, vec![0])).unwrap();
        let port = agent.server_port().unwrap();

        assert!(client(port).query(Command::Close).unwrap().is_empty());
        agent.wait();
        assert!(agent.server_port().is_none());
    }
}
