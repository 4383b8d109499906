//! # Control Client Module
//!
//! Sends the operator's demands to the vehicle at a fixed rate. Each cycle the command source is
//! sampled, the input mapped onto a command, and the command encoded and sent as one record.
//!
//! A failed send is logged and the next cycle tries again. Over TCP a reset or broken connection
//! means the vehicle has gone, so the client stops and reports [`SenderExit::PeerDisconnected`]. A
//! write which times out because the vehicle is not keeping up is treated like any other failed
//! send.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::Utc;
use comms_if::{
    ctrl::{CommandSchema, ControlCommand, WireEncoding},
    net::{self, Endpoint, NetError, TransportKind},
};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::{
    io::Write,
    net::{SocketAddr, TcpStream, UdpSocket},
};
use util::{
    rate::{RateError, RateGovernor},
    task::{LoopState, Shutdown, StateCell},
};

use crate::{
    input::{CommandSource, InputMapper, Sample},
    params::GndExecParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Sending side of the control link.
pub struct CtrlClient {
    link: ClientLink,

    endpoint: Endpoint,

    encoding: WireEncoding,

    schema: CommandSchema,

    rate: RateGovernor,

    num_consec_send_failures: u64,

    num_consec_source_failures: u64,

    stats: ClientStats,
}

/// Counters for the control client, returned when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    /// Cycles run
    pub cycles: u64,

    /// Records sent
    pub sent: u64,

    pub bytes_sent: u64,

    /// Records which could not be sent
    pub send_failures: u64,

    /// Cycles on which the source failed and the neutral command was sent instead
    pub source_failures: u64,

    /// Cycles which took longer than the period
    pub overruns: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

enum ClientLink {
    Udp(UdpSocket, SocketAddr),
    Tcp(TcpStream),
}

/// Why the client stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderExit {
    /// Shutdown was requested
    Shutdown,

    /// The TCP connection to the vehicle was lost
    PeerDisconnected,

    /// The command source has nothing more to send
    SourceExhausted,
}

/// Errors which can occur while sending a single record.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Could not send the record: {0}")]
    Transient(std::io::Error),

    #[error("The vehicle disconnected: {0}")]
    PeerDisconnected(std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CtrlClientError {
    #[error("Could not open the control link: {0}")]
    SocketError(#[from] NetError),

    #[error("Invalid control rate: {0}")]
    RateError(#[from] RateError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CtrlClient {
    /// Open the control link to the vehicle.
    ///
    /// For TCP this connects, and failing to connect is fatal.
    pub fn connect(params: &GndExecParams) -> Result<Self, CtrlClientError> {
        let rate = RateGovernor::from_hz("ctrl_client", params.ctrl_rate_hz)?;
        let endpoint = params.ctrl_endpoint();
        let options = params.ctrl_socket_options();

        let link = match endpoint.kind {
            TransportKind::Udp => {
                let (socket, remote) = net::udp_sender(&endpoint, &options)?;
                ClientLink::Udp(socket, remote)
            }
            TransportKind::Tcp => {
                let stream = net::connect_tcp(&endpoint, params.connect_timeout(), &options)?;
                ClientLink::Tcp(stream)
            }
        };

        info!(
            "Control link to {} open, sending {:?} records at {} Hz",
            endpoint, params.encoding, params.ctrl_rate_hz
        );

        Ok(Self {
            link,
            endpoint,
            encoding: params.encoding,
            schema: params.schema.clone(),
            rate,
            num_consec_send_failures: 0,
            num_consec_source_failures: 0,
            stats: ClientStats::default(),
        })
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    /// Encode and send one command, returning the number of bytes sent.
    ///
    /// The command is clamped into the schema before it is encoded.
    pub fn send(&mut self, cmd: &ControlCommand) -> Result<usize, SendError> {
        let record = self.encoding.encode(cmd, &self.schema);

        let result = match self.link {
            ClientLink::Udp(ref socket, remote) => socket
                .send_to(record.as_bytes(), remote)
                .map_err(SendError::Transient),
            // A write which times out part way leaves a torn record, which the receiver rejects
            // before resynchronising on the next newline.
            ClientLink::Tcp(ref mut stream) => stream
                .write_all(record.as_bytes())
                .map(|_| record.len())
                .map_err(|e| {
                    if net::is_disconnect(&e) {
                        SendError::PeerDisconnected(e)
                    } else {
                        SendError::Transient(e)
                    }
                }),
        };

        match result {
            Ok(n) => {
                trace!("Sent {}", cmd);
                self.stats.sent += 1;
                self.stats.bytes_sent += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.stats.send_failures += 1;
                Err(e)
            }
        }
    }

    /// Sample, map and send commands at the control rate until shutdown is requested, the TCP link
    /// is lost or the source is exhausted.
    pub fn run<S: CommandSource>(
        mut self,
        mut source: S,
        mapper: &InputMapper,
        shutdown: &Shutdown,
        state: &StateCell,
    ) -> (SenderExit, ClientStats) {
        state.set(LoopState::Running);
        info!("Control client running from {}", source.describe());

        let exit = loop {
            if !shutdown.should_continue() {
                break SenderExit::Shutdown;
            }

            self.rate.cycle_start();
            self.stats.cycles += 1;

            let mut cmd = match self.sample(&mut source, mapper) {
                Some(cmd) => cmd,
                None => {
                    info!("{} has ended, sending neutral", source.describe());
                    let neutral = mapper.schema().neutral();
                    if let Err(e) = self.send(&neutral) {
                        warn!("Could not send the final neutral command: {}", e);
                    }
                    break SenderExit::SourceExhausted;
                }
            };
            cmd.stamp(Utc::now());

            match self.send(&cmd) {
                Ok(_) => {
                    if self.num_consec_send_failures > 0 {
                        info!(
                            "Sending to {} recovered after {} failures",
                            self.endpoint, self.num_consec_send_failures
                        );
                        self.num_consec_send_failures = 0;
                    }
                }
                Err(SendError::Transient(e)) => {
                    self.num_consec_send_failures += 1;
                    if self.num_consec_send_failures == 1 {
                        warn!("Could not send to {}: {}", self.endpoint, e);
                    } else {
                        debug!("Could not send to {} again: {}", self.endpoint, e);
                    }
                }
                Err(SendError::PeerDisconnected(e)) => {
                    warn!("Lost the control link to {}: {}", self.endpoint, e);
                    break SenderExit::PeerDisconnected;
                }
            }

            self.rate.cycle_end();
        };

        state.set(LoopState::Draining);
        self.stats.overruns = self.rate.num_overruns;
        info!(
            "Control client stopping ({:?}), {} cycles, {} sent, {} send failures, {} source failures",
            exit, self.stats.cycles, self.stats.sent, self.stats.send_failures, self.stats.source_failures
        );

        (exit, self.stats)
    }

    /// Get this cycle's command from the source, or `None` if the source has ended.
    ///
    /// A failing source gives the neutral command.
    fn sample<S: CommandSource>(
        &mut self,
        source: &mut S,
        mapper: &InputMapper,
    ) -> Option<ControlCommand> {
        match source.poll() {
            Ok(Sample::Input(raw)) => {
                if self.num_consec_source_failures > 0 {
                    info!(
                        "{} recovered after {} failures",
                        source.describe(),
                        self.num_consec_source_failures
                    );
                    self.num_consec_source_failures = 0;
                }
                Some(mapper.map(&raw))
            }
            Ok(Sample::EndOfInput) => None,
            Err(e) => {
                self.stats.source_failures += 1;
                self.num_consec_source_failures += 1;
                if self.num_consec_source_failures == 1 {
                    warn!("Sending neutral, input failed: {}", e);
                } else {
                    debug!("Input failed again: {}", e);
                }
                Some(mapper.schema().neutral())
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::input::{InputMapping, RawInput, SourceError};
    use std::{collections::VecDeque, time::Duration};

    /// Source replaying a fixed list of samples, then ending.
    struct ListSource(VecDeque<Result<Sample, SourceError>>);

    impl CommandSource for ListSource {
        fn poll(&mut self) -> Result<Sample, SourceError> {
            self.0.pop_front().unwrap_or(Ok(Sample::EndOfInput))
        }

        fn describe(&self) -> String {
            "list".into()
        }
    }

    fn receiver() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        socket
    }

    fn client(port: u16, encoding: WireEncoding) -> CtrlClient {
        CtrlClient::connect(&GndExecParams {
            remote_address: "127.0.0.1".into(),
            ctrl_port: port,
            encoding,
            ..Default::default()
        })
        .unwrap()
    }

    fn recv(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 512];
        let (n, _) = socket.recv_from(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    fn mapper() -> InputMapper {
        InputMapper::new(InputMapping::default(), CommandSchema::default()).unwrap()
    }

    #[test]
    fn test_send_clamps() {
        let rx = receiver();
        let mut tx = client(rx.local_addr().unwrap().port(), WireEncoding::Text);

        let mut cmd = CommandSchema::default().neutral();
        cmd.steering = 400;
        cmd.throttle = 80;

        assert_eq!(tx.send(&cmd).unwrap(), "180,80,0,0,0\n".len());
        assert_eq!(recv(&rx), "180,80,0,0,0\n");
        assert_eq!(tx.stats().sent, 1);
    }

    #[test]
    fn test_run_until_source_ends() {
        let rx = receiver();
        let tx = client(rx.local_addr().unwrap().port(), WireEncoding::Json);

        let source = ListSource(
            vec![
                Ok(Sample::Input(RawInput {
                    axes: vec![1.0, 1.0, -1.0, 1.0],
                    buttons: vec![],
                })),
                Err(SourceError::Disconnected("test".into())),
            ]
            .into_iter()
            .collect(),
        );

        let (exit, stats) = tx.run(source, &mapper(), &Shutdown::new(), &StateCell::default());
        assert_eq!(exit, SenderExit::SourceExhausted);
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.source_failures, 1);

        let schema = CommandSchema::default();
        let first = WireEncoding::Json.decode(recv(&rx).as_bytes(), &schema).unwrap();
        assert_eq!(first.steering, 180);
        assert_eq!(first.throttle, 100);
        assert!(first.timestamp.is_some());

        // A failed source and the end of input both send neutral
        for _ in 0..2 {
            let cmd = WireEncoding::Json.decode(recv(&rx).as_bytes(), &schema).unwrap();
            assert_eq!(cmd, schema.neutral());
        }
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let rx = receiver();
        let tx = client(rx.local_addr().unwrap().port(), WireEncoding::Text);

        let shutdown = Shutdown::new();
        shutdown.request();

        let (exit, stats) = tx.run(
            crate::input::NeutralSource::new(),
            &mapper(),
            &shutdown,
            &StateCell::default(),
        );
        assert_eq!(exit, SenderExit::Shutdown);
        assert_eq!(stats.sent, 0);
    }

    #[test]
    fn test_tcp_write_timeout_is_transient() {
        // A vehicle which accepts the connection but never reads it
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut tx = CtrlClient::connect(&GndExecParams {
            remote_address: "127.0.0.1".into(),
            ctrl_port: listener.local_addr().unwrap().port(),
            transport: TransportKind::Tcp,
            ctrl_send_buffer: 4096,
            ..Default::default()
        })
        .unwrap();
        let (_stalled, _) = listener.accept().unwrap();

        let cmd = CommandSchema::default().neutral();
        let mut timed_out = None;
        for _ in 0..1_000_000 {
            match tx.send(&cmd) {
                Ok(_) => (),
                Err(e) => {
                    timed_out = Some(e);
                    break;
                }
            }
        }

        match timed_out {
            Some(SendError::Transient(e)) => assert!(net::is_timeout(&e)),
            other => panic!("expected a write timeout, got {:?}", other),
        }
        assert!(matches!(tx.send(&cmd), Err(SendError::Transient(_))));

        // The client keeps going until told to stop
        let shutdown = Shutdown::new();
        let stopper = shutdown.clone();
        let jh = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            stopper.request();
        });

        let (exit, stats) = tx.run(
            crate::input::NeutralSource::new(),
            &mapper(),
            &shutdown,
            &StateCell::default(),
        );
        jh.join().unwrap();

        assert_eq!(exit, SenderExit::Shutdown);
        assert!(stats.send_failures >= 3);
    }

    #[test]
    fn test_connect_refused_is_fatal() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };

        let result = CtrlClient::connect(&GndExecParams {
            remote_address: "127.0.0.1".into(),
            ctrl_port: port,
            transport: TransportKind::Tcp,
            connect_timeout_ms: 200,
            ..Default::default()
        });
        assert!(matches!(result, Err(CtrlClientError::SocketError(_))));
    }

    #[test]
    fn test_invalid_rate() {
        let result = CtrlClient::connect(&GndExecParams {
            remote_address: "127.0.0.1".into(),
            ctrl_rate_hz: 0.0,
            ..Default::default()
        });
        assert!(matches!(result, Err(CtrlClientError::RateError(_))));
    }
}
