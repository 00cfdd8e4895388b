//! One configured RADIUS server and its runtime state

use crate::config::{ConfigError, ServerConfig};
use crate::pool::SlotPool;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

/// Position of a server in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerId(pub usize);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Non-blocking send half of a connected datagram socket
pub trait DatagramSocket: Send + Sync {
    /// Send one datagram without waiting for the socket to become writable
    fn try_send(&self, datagram: &[u8]) -> io::Result<usize>;
}

/// A connected socket in non-blocking mode. The receive side of the same
/// descriptor may be registered with Tokio; sends go straight to the kernel
/// and do not depend on the reactor having seen the socket writable.
impl DatagramSocket for std::net::UdpSocket {
    fn try_send(&self, datagram: &[u8]) -> io::Result<usize> {
        self.send(datagram)
    }
}

/// Per-server counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Access-Requests handed to the socket, retries included
    pub requests_sent: u64,
    /// Authenticated Access-Accepts
    pub accepts: u64,
    /// Authenticated Access-Rejects
    pub rejects: u64,
    /// Response timers that fired
    pub timeouts: u64,
    /// Datagrams discarded as stray, stale, spoofed or malformed
    pub dropped: u64,
    /// Failed sends
    pub send_errors: u64,
    /// Failed receives
    pub recv_errors: u64,
}

impl ServerStats {
    pub fn record_request(&mut self) {
        self.requests_sent += 1;
    }

    pub fn record_accept(&mut self) {
        self.accepts += 1;
    }

    pub fn record_reject(&mut self) {
        self.rejects += 1;
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn record_dropped(&mut self) {
        self.dropped += 1;
    }

    pub fn record_send_error(&mut self) {
        self.send_errors += 1;
    }

    pub fn record_recv_error(&mut self) {
        self.recv_errors += 1;
    }
}

/// A RADIUS server: immutable address and secret plus its slot pool and socket
pub struct Server {
    /// Index in the registry
    pub id: ServerId,
    /// Server name (for logging)
    pub name: String,
    /// Server socket address
    pub address: SocketAddr,
    secret: Vec<u8>,
    nas_identifier: Option<Vec<u8>>,
    pub(crate) pool: SlotPool,
    socket: Option<Arc<dyn DatagramSocket>>,
    pub(crate) stats: ServerStats,
}

impl Server {
    /// Create a server from configuration
    pub fn new(id: ServerId, config: &ServerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Server {
            id,
            name: config.display_name().to_string(),
            address: config.socket_addr()?,
            secret: config.secret.as_bytes().to_vec(),
            nas_identifier: config.nas_identifier.as_ref().map(|n| n.as_bytes().to_vec()),
            pool: SlotPool::new(),
            socket: None,
            stats: ServerStats::default(),
        })
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    pub fn nas_identifier(&self) -> Option<&[u8]> {
        self.nas_identifier.as_deref()
    }

    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub(crate) fn attach(&mut self, socket: Arc<dyn DatagramSocket>) {
        self.socket = Some(socket);
    }

    pub(crate) fn detach(&mut self) -> Option<Arc<dyn DatagramSocket>> {
        self.socket.take()
    }

    /// Send one datagram to the server
    ///
    /// A short write counts as a failure since RADIUS cannot use a truncated
    /// packet.
    pub fn send(&self, datagram: &[u8]) -> io::Result<()> {
        let socket = self.socket.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "server socket is not open")
        })?;

        let sent = socket.try_send(datagram)?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {} of {} bytes", sent, datagram.len()),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .field("in_flight", &self.pool.in_flight())
            .field("open", &self.is_open())
            .field("stats", &self.stats)
            .finish()
    }
}
