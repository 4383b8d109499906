//! # Control Server Module
//!
//! Receives control records from the operator station and publishes each valid one into the
//! command slot read by the actuator bridge.
//!
//! Over UDP every datagram is one record. Over TCP records are newline terminated, and one
//! operator connection is served at a time. When that peer disconnects the server goes back to
//! accepting.
//!
//! Records which fail to decode are logged and dropped. Nothing is published for them, so the
//! bridge keeps acting on the last valid command.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    ctrl::{CommandSchema, ControlCommand, WireEncoding},
    net::{self, framing::LineFramer, NetError, SocketOptions, TransportKind, MAX_DATAGRAM_SIZE},
};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::{
    io::Read,
    net::{SocketAddr, TcpListener, TcpStream, UdpSocket},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use util::{
    rate::Backoff,
    slot::SharedLatestSlot,
    task::{LoopState, Shutdown, StateCell},
};

use crate::params::MechExecParams;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Interval between polls of the non-blocking TCP listener.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Size of the TCP read buffer.
const STREAM_READ_SIZE: usize = 4096;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Receiving side of the control link.
pub struct CtrlServer {
    socket: ServerSocket,

    local_addr: SocketAddr,

    encoding: WireEncoding,

    schema: CommandSchema,

    options: SocketOptions,

    max_record_len: usize,

    slot: SharedLatestSlot<ControlCommand>,

    stats: Arc<LinkStats>,
}

/// Counters describing the quality of the control link, shared with the owner of the server.
#[derive(Debug, Default)]
pub struct LinkStats {
    records: AtomicU64,
    published: AtomicU64,
    rejected: AtomicU64,
    overlong: AtomicU64,
    read_errors: AtomicU64,
    peers: AtomicU64,
}

/// Point in time copy of the [`LinkStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStatsSnapshot {
    /// Records received, valid or not
    pub records: u64,

    /// Records decoded and published
    pub published: u64,

    /// Records which failed to decode
    pub rejected: u64,

    /// TCP records discarded for exceeding the length limit
    pub overlong: u64,

    /// Transport level read errors
    pub read_errors: u64,

    /// TCP peers accepted
    pub peers: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

enum ServerSocket {
    Udp(UdpSocket),
    Tcp(TcpListener),
}

/// Errors which can occur in the [`CtrlServer`]
#[derive(thiserror::Error, Debug)]
pub enum CtrlServerError {
    #[error("Could not open the control socket: {0}")]
    SocketError(#[from] NetError),

    #[error("Could not read the local address of the control socket: {0}")]
    LocalAddrError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CtrlServer {
    /// Bind the control socket.
    ///
    /// Failing to bind is fatal, the executable cannot do anything useful without it.
    pub fn new(
        params: &MechExecParams,
        slot: SharedLatestSlot<ControlCommand>,
    ) -> Result<Self, CtrlServerError> {
        let endpoint = params.ctrl_endpoint();
        let options = params.socket_options();

        let (socket, local_addr) = match endpoint.kind {
            TransportKind::Udp => {
                let s = net::bind_udp(&endpoint, &options)?;
                let a = s.local_addr().map_err(CtrlServerError::LocalAddrError)?;
                (ServerSocket::Udp(s), a)
            }
            TransportKind::Tcp => {
                let l = net::bind_tcp(&endpoint, &options)?;
                let a = l.local_addr().map_err(CtrlServerError::LocalAddrError)?;
                (ServerSocket::Tcp(l), a)
            }
        };

        info!("Control server bound to {} ({:?})", local_addr, endpoint.kind);

        Ok(Self {
            socket,
            local_addr,
            encoding: params.encoding,
            schema: params.schema.clone(),
            options,
            max_record_len: params.max_record_len,
            slot,
            stats: Arc::new(LinkStats::default()),
        })
    }

    /// The address the server is bound to, useful when binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handle to the link statistics.
    pub fn stats(&self) -> Arc<LinkStats> {
        self.stats.clone()
    }

    /// Decode one record and publish it if valid.
    ///
    /// Returns the published command.
    pub fn handle_record(&self, record: &[u8], peer: SocketAddr) -> Option<ControlCommand> {
        self.stats.records.fetch_add(1, Ordering::Relaxed);

        match self.encoding.decode(record, &self.schema) {
            Ok(cmd) => {
                trace!("Control record from {}: {}", peer, cmd);
                self.slot.publish(cmd);
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                Some(cmd)
            }
            Err(e) => {
                debug!(
                    "Discarding control record from {} ({}): {:?}",
                    peer,
                    e,
                    String::from_utf8_lossy(record)
                );
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Run the receive loop until shutdown is requested.
    ///
    /// The socket is closed when this returns.
    pub fn run(self, shutdown: &Shutdown, state: &StateCell) {
        state.set(LoopState::Running);
        info!("Control server running");

        match self.socket {
            ServerSocket::Udp(ref s) => self.run_udp(s, shutdown),
            ServerSocket::Tcp(ref l) => self.run_tcp(l, shutdown),
        }

        state.set(LoopState::Draining);
        info!("Control server stopping, {}", self.stats.snapshot());
    }

    fn run_udp(&self, socket: &UdpSocket, shutdown: &Shutdown) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut backoff = Backoff::default();

        while shutdown.should_continue() {
            match socket.recv_from(&mut buf) {
                Ok((n, peer)) => {
                    backoff.reset();
                    self.handle_record(&buf[..n], peer);
                }
                Err(e) if net::is_timeout(&e) => continue,
                Err(e) => {
                    self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                    let delay = backoff.next_delay();
                    warn!("Control socket read failed, retrying in {:?}: {}", delay, e);
                    shutdown.sleep(delay);
                }
            }
        }
    }

    fn run_tcp(&self, listener: &TcpListener, shutdown: &Shutdown) {
        let mut backoff = Backoff::default();

        while shutdown.should_continue() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    backoff.reset();
                    self.stats.peers.fetch_add(1, Ordering::Relaxed);
                    info!("Operator connected from {}", peer);

                    if let Err(e) = net::configure_accepted(&stream, &self.options) {
                        warn!("Could not configure the connection from {}: {}", peer, e);
                        continue;
                    }

                    self.serve_peer(stream, peer, shutdown);
                }
                Err(e) if net::is_timeout(&e) => shutdown.sleep(ACCEPT_POLL_INTERVAL),
                Err(e) => {
                    self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                    let delay = backoff.next_delay();
                    warn!("Accept on control socket failed, retrying in {:?}: {}", delay, e);
                    shutdown.sleep(delay);
                }
            }
        }
    }

    /// Read records from one connected peer until it disconnects or shutdown is requested.
    fn serve_peer(&self, mut stream: TcpStream, peer: SocketAddr, shutdown: &Shutdown) {
        let mut framer = LineFramer::new(self.max_record_len);
        let mut buf = [0u8; STREAM_READ_SIZE];

        while shutdown.should_continue() {
            match stream.read(&mut buf) {
                Ok(0) => {
                    info!("Operator at {} disconnected", peer);
                    break;
                }
                Ok(n) => {
                    let overlong_before = framer.num_overlong();

                    for record in framer.push(&buf[..n]) {
                        self.handle_record(&record, peer);
                    }

                    let overlong = framer.num_overlong() - overlong_before;
                    if overlong > 0 {
                        debug!("Discarded {} over-long record(s) from {}", overlong, peer);
                        self.stats.overlong.fetch_add(overlong, Ordering::Relaxed);
                    }
                }
                Err(e) if net::is_timeout(&e) => continue,
                Err(e) => {
                    self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Connection from {} lost: {}", peer, e);
                    break;
                }
            }
        }

        if framer.pending() > 0 {
            debug!(
                "Dropping {} bytes of unterminated record from {}",
                framer.pending(),
                peer
            );
        }
    }
}

impl LinkStats {
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            records: self.records.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            overlong: self.overlong.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            peers: self.peers.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for LinkStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} records, {} published, {} rejected, {} over-long, {} read errors, {} peers",
            self.records, self.published, self.rejected, self.overlong, self.read_errors, self.peers
        )
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
