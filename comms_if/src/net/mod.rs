//! # Network Module
//!
//! Both planes run over plain sockets. This module provides the [`Endpoint`] description loaded
//! from the parameter files, and helpers to open correctly configured UDP and TCP sockets from
//! them using `socket2`.
//!
//! All receive sockets are given a read timeout so that the loops using them can check for a
//! shutdown request at least once per timeout.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod framing;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    fmt,
    io,
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket},
    time::Duration,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Largest payload which fits in a single IPv4 UDP datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

macro_rules! set_sockopts {
    ($socket:expr, $(($opt:ident, $val:expr)),+) => {
        $(
            $socket.$opt($val)
                .map_err(|e| NetError::SocketOptionError(stringify!($opt).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An address, port and transport kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Hostname or IP address
    pub address: String,

    pub port: u16,

    pub kind: TransportKind,
}

/// Represents options which can be set on a socket before it is bound or connected.
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    /// `SO_REUSEADDR`, allows a restarted executable to bind immediately.
    ///
    /// The default value is `true`.
    pub reuse_address: bool,

    /// `SO_RCVBUF` in bytes, `None` leaves the operating system default.
    pub recv_buffer_size: Option<usize>,

    /// `SO_SNDBUF` in bytes, `None` leaves the operating system default.
    pub send_buffer_size: Option<usize>,

    /// Timeout on blocking reads. `None` blocks forever, which should only be used for sockets
    /// that are never read.
    ///
    /// The default value is 200 ms.
    pub recv_timeout: Option<Duration>,

    /// Timeout on blocking writes.
    ///
    /// The default value is 100 ms.
    pub send_timeout: Option<Duration>,

    /// `TCP_NODELAY`, only applied to TCP streams.
    ///
    /// The default value is `true`.
    pub nodelay: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Transport used by an [`Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Connectionless datagrams, one record per datagram.
    Udp,

    /// A connection oriented stream, records are separated by newlines.
    Tcp,
}

/// Errors which can occur while opening a socket.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("Could not resolve {0}: {1}")]
    ResolveError(String, io::Error),

    #[error("{0} did not resolve to any address")]
    NoAddress(String),

    #[error("Could not create the socket: {0}")]
    CreateError(io::Error),

    #[error("Could not set socket option {0}: {1}")]
    SocketOptionError(String, io::Error),

    #[error("Could not bind to {0}: {1}")]
    BindError(SocketAddr, io::Error),

    #[error("Could not listen on {0}: {1}")]
    ListenError(SocketAddr, io::Error),

    #[error("Could not connect to {0}: {1}")]
    ConnectError(SocketAddr, io::Error),

    #[error("Expected a {0:?} endpoint, found {1:?}")]
    WrongTransport(TransportKind, TransportKind),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Endpoint {
    pub fn new<S: Into<String>>(address: S, port: u16, kind: TransportKind) -> Self {
        Self {
            address: address.into(),
            port,
            kind,
        }
    }

    /// Resolve the endpoint into a socket address, preferring the first result.
    pub fn socket_addr(&self) -> Result<SocketAddr, NetError> {
        let mut addrs = (self.address.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| NetError::ResolveError(self.to_string(), e))?;

        addrs.next().ok_or_else(|| NetError::NoAddress(self.to_string()))
    }

    fn expect_kind(&self, kind: TransportKind) -> Result<(), NetError> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(NetError::WrongTransport(kind, self.kind))
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
        };
        write!(f, "{}://{}:{}", kind, self.address, self.port)
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reuse_address: true,
            recv_buffer_size: None,
            send_buffer_size: None,
            recv_timeout: Some(Duration::from_millis(200)),
            send_timeout: Some(Duration::from_millis(100)),
            nodelay: true,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Bind a UDP socket to a local endpoint for receiving datagrams.
pub fn bind_udp(local: &Endpoint, options: &SocketOptions) -> Result<UdpSocket, NetError> {
    local.expect_kind(TransportKind::Udp)?;
    let addr = local.socket_addr()?;

    let socket = new_socket(addr, Type::DGRAM, Protocol::UDP, options)?;
    socket
        .bind(&addr.into())
        .map_err(|e| NetError::BindError(addr, e))?;
    debug!("UDP socket bound to {}", addr);

    Ok(socket.into())
}

/// Open a UDP socket for sending datagrams to the given remote endpoint.
///
/// The socket is bound to an ephemeral port on the unspecified address of the remote's family and
/// is not connected, so that an unreachable peer does not turn later sends into errors.
pub fn udp_sender(remote: &Endpoint, options: &SocketOptions) -> Result<(UdpSocket, SocketAddr), NetError> {
    remote.expect_kind(TransportKind::Udp)?;
    let remote_addr = remote.socket_addr()?;

    let local_addr: SocketAddr = if remote_addr.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };

    let socket = new_socket(local_addr, Type::DGRAM, Protocol::UDP, options)?;
    socket
        .bind(&local_addr.into())
        .map_err(|e| NetError::BindError(local_addr, e))?;
    debug!("UDP sender opened for {}", remote_addr);

    Ok((socket.into(), remote_addr))
}

/// Bind a TCP listener to a local endpoint.
///
/// The listener is non-blocking so that the accept loop can poll for shutdown.
pub fn bind_tcp(local: &Endpoint, options: &SocketOptions) -> Result<TcpListener, NetError> {
    local.expect_kind(TransportKind::Tcp)?;
    let addr = local.socket_addr()?;

    let socket = new_socket(addr, Type::STREAM, Protocol::TCP, options)?;
    socket
        .bind(&addr.into())
        .map_err(|e| NetError::BindError(addr, e))?;
    socket
        .listen(1)
        .map_err(|e| NetError::ListenError(addr, e))?;
    set_sockopts!(socket, (set_nonblocking, true));
    debug!("TCP listener bound to {}", addr);

    Ok(socket.into())
}

/// Connect a TCP stream to a remote endpoint, waiting at most `timeout`.
pub fn connect_tcp(
    remote: &Endpoint,
    timeout: Duration,
    options: &SocketOptions,
) -> Result<TcpStream, NetError> {
    remote.expect_kind(TransportKind::Tcp)?;
    let addr = remote.socket_addr()?;

    let socket = new_socket(addr, Type::STREAM, Protocol::TCP, options)?;
    socket
        .connect_timeout(&addr.into(), timeout)
        .map_err(|e| NetError::ConnectError(addr, e))?;
    set_sockopts!(socket, (set_nodelay, options.nodelay));
    debug!("TCP stream connected to {}", addr);

    Ok(socket.into())
}

/// Apply the timeouts from the options to a stream accepted by a listener.
pub fn configure_accepted(stream: &TcpStream, options: &SocketOptions) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(options.recv_timeout)?;
    stream.set_write_timeout(options.send_timeout)?;
    stream.set_nodelay(options.nodelay)
}

/// Returns true if the error is a read or write timeout rather than a failure.
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Returns true if the error means the peer of a stream has gone away.
pub fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn new_socket(
    addr: SocketAddr,
    ty: Type,
    protocol: Protocol,
    options: &SocketOptions,
) -> Result<Socket, NetError> {
    let socket = Socket::new(Domain::for_address(addr), ty, Some(protocol))
        .map_err(NetError::CreateError)?;

    set_sockopts!(
        socket,
        (set_reuse_address, options.reuse_address),
        (set_read_timeout, options.recv_timeout),
        (set_write_timeout, options.send_timeout)
    );

    if let Some(size) = options.recv_buffer_size {
        set_sockopts!(socket, (set_recv_buffer_size, size));
    }
    if let Some(size) = options.send_buffer_size {
        set_sockopts!(socket, (set_send_buffer_size, size));
    }

    Ok(socket)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
