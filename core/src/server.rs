//! Generic single-connection request/response TCP server
//!
//! [`TcpServer::try_start`] binds on a background thread and blocks until
//! that thread reports the bind outcome over a one-shot channel. The thread
//! then serves connections strictly one at a time: read one request frame,
//! answer with one response frame, close the connection, and close the
//! listener when the handler says so.

use crate::config::DEFAULT_MAX_FRAME_BYTES;
use crate::error::{ProtocolError, ServerError};
use crate::log_buffer::SERVER_TAG;
use crate::protocol::{read_frame, write_frame, write_stream_header};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::io::{self, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Request contract of a [`TcpServer`]
pub trait RequestHandler: Send + Sync + 'static {
    /// Decoded request frame
    type Request: DeserializeOwned + Debug;
    /// Encoded response frame
    type Response: Serialize;

    /// Produce the answer for one request
    fn on_request(&self, request: &Self::Request) -> Self::Response;

    /// Whether the listener should close after answering this request
    fn should_close(&self, request: &Self::Request) -> bool;
}

/// [`RequestHandler`] built from a pair of closures
pub struct FnHandler<Req, Resp, F, C> {
    on_request: F,
    should_close: C,
    _marker: PhantomData<fn(&Req) -> Resp>,
}

impl<Req, Resp, F, C> FnHandler<Req, Resp, F, C>
where
    F: Fn(&Req) -> Resp,
    C: Fn(&Req) -> bool,
{
    /// Wrap the request function and close predicate
    pub fn new(on_request: F, should_close: C) -> Self {
        Self {
            on_request,
            should_close,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp, F, C> RequestHandler for FnHandler<Req, Resp, F, C>
where
    Req: DeserializeOwned + Debug + 'static,
    Resp: Serialize + 'static,
    F: Fn(&Req) -> Resp + Send + Sync + 'static,
    C: Fn(&Req) -> bool + Send + Sync + 'static,
{
    type Request = Req;
    type Response = Resp;

    fn on_request(&self, request: &Req) -> Resp {
        (self.on_request)(request)
    }

    fn should_close(&self, request: &Req) -> bool {
        (self.should_close)(request)
    }
}

/// Per-instance server settings
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Interface to bind
    pub bind_address: IpAddr,
    /// Read timeout on accepted connections; expiry closes the server
    pub read_timeout: Option<Duration>,
    /// Largest accepted request frame
    pub max_frame_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            read_timeout: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerOptions {
    /// Set the bind address
    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Set the connection read timeout
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the request frame limit
    pub fn max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }
}

/// Server that hands each bound listener to its own accept-loop thread
pub struct TcpServer<H: RequestHandler> {
    handler: Arc<H>,
    options: ServerOptions,
}

impl<H: RequestHandler> TcpServer<H> {
    /// Create a server with default options
    pub fn new(handler: Arc<H>) -> Self {
        Self::with_options(handler, ServerOptions::default())
    }

    /// Create a server with custom options
    pub fn with_options(handler: Arc<H>, options: ServerOptions) -> Self {
        Self { handler, options }
    }

    /// Handler shared with every started instance
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Try to start serving on `port`.
    ///
    /// Returns `Ok(None)` when the port is already in use. Returns only once
    /// the background thread has either bound the socket or failed to.
    pub fn try_start(&self, port: u16) -> Result<Option<ServerHandle>, ServerError> {
        log::trace!(target: SERVER_TAG, "tryStart(port:{}): entering", port);

        let (handshake_tx, handshake_rx) = sync_channel::<io::Result<SocketAddr>>(1);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(false));
        let active = Arc::new(ActiveConnection::default());

        let handler = Arc::clone(&self.handler);
        let options = self.options.clone();
        let thread_stop = Arc::clone(&stop_flag);
        let thread_running = Arc::clone(&running);
        let thread_active = Arc::clone(&active);

        let thread = thread::Builder::new()
            .name(format!("callwatch-server-{}", port))
            .spawn(move || {
                let listener = match TcpListener::bind((options.bind_address, port)) {
                    Ok(listener) => listener,
                    Err(e) => {
                        let _ = handshake_tx.send(Err(e));
                        return;
                    }
                };
                let local_addr = match listener.local_addr() {
                    Ok(addr) => addr,
                    Err(e) => {
                        let _ = handshake_tx.send(Err(e));
                        return;
                    }
                };

                let _running = RunningFlag::raise(thread_running);
                if handshake_tx.send(Ok(local_addr)).is_err() {
                    return;
                }

                accept_loop(listener, handler.as_ref(), &options, &thread_stop, &thread_active);
            })
            .map_err(|source| ServerError::Spawn { port, source })?;

        let outcome = match handshake_rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => {
                let _ = thread.join();
                return Err(ServerError::Handshake { port });
            }
        };

        match outcome {
            Ok(local_addr) => {
                log::debug!(target: SERVER_TAG, "tryStart(port:{}): SUCCESS {}", port, local_addr);
                Ok(Some(ServerHandle {
                    port: local_addr.port(),
                    local_addr,
                    stop_flag,
                    running,
                    active,
                    thread: Some(thread),
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                let _ = thread.join();
                log::debug!(
                    target: SERVER_TAG,
                    "tryStart(port:{}): FAILURE address already in use",
                    port
                );
                Ok(None)
            }
            Err(source) => {
                let _ = thread.join();
                Err(ServerError::Bind { port, source })
            }
        }
    }
}

/// Raised while the accept loop owns the listener; lowered on exit or panic
struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    fn raise(flag: Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Connection currently being served, kept so `stop` can unblock its read
#[derive(Default)]
struct ActiveConnection {
    stream: Mutex<Option<TcpStream>>,
}

impl ActiveConnection {
    fn lock(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `stream` unless a stop was requested. Checked under the lock,
    /// so a concurrent `interrupt` either sees the stream or we see the flag.
    fn register(&self, stream: &TcpStream, stop_flag: &AtomicBool) -> bool {
        let mut slot = self.lock();
        if stop_flag.load(Ordering::Acquire) {
            return false;
        }
        *slot = stream.try_clone().ok();
        true
    }

    fn clear(&self) {
        self.lock().take();
    }

    /// Shut down the registered stream, failing any pending read
    fn interrupt(&self) {
        if let Some(stream) = self.lock().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Serve connections until the handler asks to close, a connection fails,
/// or a stop is requested. Dropping the listener on return closes the port.
fn accept_loop<H: RequestHandler>(
    listener: TcpListener,
    handler: &H,
    options: &ServerOptions,
    stop_flag: &AtomicBool,
    active: &ActiveConnection,
) {
    let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();

    for stream in listener.incoming() {
        if stop_flag.load(Ordering::Acquire) {
            log::debug!(target: SERVER_TAG, "stop requested / port:{}", port);
            break;
        }

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                log::error!(target: SERVER_TAG, "! accept failed on port {}: {}", port, e);
                break;
            }
        };

        if !active.register(&stream, stop_flag) {
            log::debug!(target: SERVER_TAG, "stop requested / port:{}", port);
            break;
        }
        let outcome = serve_connection(stream, handler, options);
        active.clear();

        match outcome {
            Ok(true) => {
                log::debug!(target: SERVER_TAG, "shouldClose(): true / port:{}", port);
                break;
            }
            Ok(false) => {}
            Err(_) if stop_flag.load(Ordering::Acquire) => {
                log::debug!(target: SERVER_TAG, "connection interrupted by stop / port:{}", port);
                break;
            }
            Err(e) => {
                log::error!(
                    target: SERVER_TAG,
                    "! Closing monitor server on port {}: {}",
                    port,
                    e
                );
                break;
            }
        }
    }

    drop(listener);
    log::debug!(target: SERVER_TAG, "server socket closed / port:{}", port);
}

/// One request/response exchange. Returns whether the listener should close.
fn serve_connection<H: RequestHandler>(
    stream: TcpStream,
    handler: &H,
    options: &ServerOptions,
) -> Result<bool, ProtocolError> {
    stream.set_read_timeout(options.read_timeout)?;

    let mut writer = BufWriter::new(&stream);
    // The peer may wait for our header before it sends its request
    write_stream_header(&mut writer)?;
    writer.flush()?;

    let mut reader = BufReader::new(&stream);
    let request: H::Request = read_frame(&mut reader, options.max_frame_bytes)?;
    log::debug!(target: SERVER_TAG, "onRequest({:?})", request);

    let response = handler.on_request(&request);
    write_frame(&mut writer, &response)?;
    writer.flush()?;

    Ok(handler.should_close(&request))
}

/// Handle to a running server instance
pub struct ServerHandle {
    port: u16,
    local_addr: SocketAddr,
    stop_flag: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    active: Arc<ActiveConnection>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Bound port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the accept loop still owns an open listener
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Close the listener and wait for the accept loop to exit.
    ///
    /// A connection being served is shut down, so an idle peer cannot keep
    /// the loop blocked in a read.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        self.active.interrupt();
        if self.is_running() {
            self.wake_listener();
        }
        self.join_thread();
    }

    /// Block until the accept loop exits on its own (e.g. after `close`)
    pub fn join(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            if let Err(e) = thread.join() {
                log::warn!(target: SERVER_TAG, "Server thread panicked: {:?}", e);
            }
        }
    }

    /// Unblock `accept()` with a dummy connection
    fn wake_listener(&self) {
        let mut addr = self.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        let _ = TcpStream::connect_timeout(&addr, Duration::from_millis(500));
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish()
    }
}
