//! Controller-side client for the monitor protocol
//!
//! Each query opens a fresh connection, mirroring the server's one exchange
//! per connection.

use crate::error::ProtocolError;
use crate::protocol::{read_frame, read_stream_header, write_frame, Command, Response};
use std::io::{BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Default connect/read/write timeout
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default response limit: anything the `u32` length prefix can describe.
///
/// `getLogs` drains the server's buffer before answering, so a response the
/// client refuses is lost.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = u32::MAX as usize;

/// Client for a single monitor server
#[derive(Debug, Clone)]
pub struct MonitorClient {
    addr: SocketAddr,
    timeout: Duration,
    max_response_bytes: usize,
}

impl MonitorClient {
    /// Client for the monitor listening on `addr`
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: DEFAULT_CLIENT_TIMEOUT,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }

    /// Set the connect, read and write timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the largest response frame accepted
    pub fn max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = max;
        self
    }

    /// Monitor address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send a command and return the server's rows
    pub fn query(&self, command: Command) -> Result<Response, ProtocolError> {
        self.send_raw(command.token())
    }

    /// Send an arbitrary request token, known to the server or not
    pub fn send_raw(&self, request: &str) -> Result<Response, ProtocolError> {
        let stream = TcpStream::connect_timeout(&self.addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut reader = BufReader::new(&stream);
        read_stream_header(&mut reader)?;

        let mut writer = BufWriter::new(&stream);
        write_frame(&mut writer, request)?;
        writer.flush()?;

        read_frame(&mut reader, self.max_response_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, TcpListener};

    #[test]
    fn test_builder() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 59701);
        let client = MonitorClient::new(addr)
            .timeout(Duration::from_millis(250))
            .max_response_bytes(128);

        assert_eq!(client.addr(), addr);
        assert_eq!(client.timeout, Duration::from_millis(250));
        assert_eq!(client.max_response_bytes, 128);
    }

    #[test]
    fn test_response_limit_exceeds_request_limit() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 59701);
        let client = MonitorClient::new(addr);
        assert!(client.max_response_bytes > crate::config::DEFAULT_MAX_FRAME_BYTES);
    }

    #[test]
    fn test_connection_refused() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let result = MonitorClient::new(addr).query(Command::GetTime);
        assert!(matches!(result, Err(ProtocolError::Io(_))));
    }

    #[test]
    fn test_rejects_foreign_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"HTTP/1.1 200 OK\r\n").unwrap();
        });

        let result = MonitorClient::new(addr)
            .timeout(Duration::from_secs(2))
            .query(Command::ConnectionCheck);
        assert!(matches!(result, Err(ProtocolError::BadHeader(magic)) if &magic == b"HTTP"));
        server.join().unwrap();
    }
}
