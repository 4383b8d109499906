//! # Camera Stream
//!
//! Sends compressed frames to the operator station, one JPEG per UDP datagram.
//!
//! A frame whose encoded size is over the payload limit is never split. It is dropped, logged and
//! counted, and the stream carries on with the next capture.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::cam::{CamImage, EncodedFrame},
    net::{self, NetError, SocketOptions},
};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::net::{SocketAddr, UdpSocket};
use util::{
    rate::{FpsCounter, RateError, RateGovernor},
    task::{LoopState, Shutdown, StateCell},
};

use crate::{params::CamExecParams, source::FrameSource};

// -----------------------------------------------------------------------------------------------
// STRUCTS
// -----------------------------------------------------------------------------------------------

pub struct FrameSender {
    socket: UdpSocket,
    remote: SocketAddr,
    quality: u8,
    max_payload: usize,
    fps: f64,
    fps_counter: FpsCounter,
    num_consec_capture_failures: u64,
    stats: StreamStats,
}

/// Counters for the stream, returned when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub captured: u64,
    pub capture_failures: u64,
    pub encode_failures: u64,
    pub sent: u64,
    pub bytes_sent: u64,
    pub dropped_oversize: u64,
    pub send_failures: u64,
}

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

/// What happened to a frame handed to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Sent as a datagram of this many bytes
    Sent(usize),

    /// Not sent, this many bytes is over the payload limit
    Dropped(usize),

    /// Encoding or the send itself failed
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Could not open the stream socket: {0}")]
    SocketError(#[from] NetError),

    #[error("Invalid stream rate: {0}")]
    RateError(#[from] RateError),
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl FrameSender {
    pub fn new(params: &CamExecParams) -> Result<Self, StreamError> {
        let options = SocketOptions {
            recv_timeout: None,
            send_buffer_size: match params.send_buffer_size {
                0 => None,
                s => Some(s),
            },
            ..Default::default()
        };

        let (socket, remote) = net::udp_sender(&params.remote_endpoint(), &options)?;

        info!(
            "Streaming to {} at {} fps, quality {}, max payload {} bytes",
            remote, params.fps, params.jpeg_quality, params.max_payload
        );

        Ok(Self {
            socket,
            remote,
            quality: params.jpeg_quality,
            max_payload: params.max_payload,
            fps: params.fps,
            fps_counter: FpsCounter::new(),
            num_consec_capture_failures: 0,
            stats: StreamStats::default(),
        })
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Compress and send one image.
    pub fn send_frame(&mut self, image: &CamImage) -> SendOutcome {
        let frame = match image.encode(self.quality) {
            Ok(f) => f,
            Err(e) => {
                self.stats.encode_failures += 1;
                warn!("Skipping frame: {}", e);
                return SendOutcome::Failed;
            }
        };

        self.send_encoded(&frame)
    }

    /// Send an already compressed frame as a single datagram.
    pub fn send_encoded(&mut self, frame: &EncodedFrame) -> SendOutcome {
        if frame.len() > self.max_payload {
            self.stats.dropped_oversize += 1;
            warn!(
                "Dropping frame of {} bytes, over the {} byte payload limit ({} dropped so far)",
                frame.len(),
                self.max_payload,
                self.stats.dropped_oversize
            );
            return SendOutcome::Dropped(frame.len());
        }

        match self.socket.send_to(frame.as_bytes(), self.remote) {
            Ok(n) => {
                trace!("Sent {} byte frame", n);
                self.stats.sent += 1;
                self.stats.bytes_sent += n as u64;

                if let Some(fps) = self.fps_counter.record() {
                    info!("Streaming at {:.1} fps", fps);
                }

                SendOutcome::Sent(n)
            }
            Err(e) => {
                self.stats.send_failures += 1;
                warn!("Could not send {} byte frame to {}: {}", frame.len(), self.remote, e);
                SendOutcome::Failed
            }
        }
    }

    /// Capture and send frames at the target rate until shutdown is requested.
    pub fn run<S: FrameSource>(
        mut self,
        mut source: S,
        shutdown: &Shutdown,
        state: &StateCell,
    ) -> Result<StreamStats, StreamError> {
        let mut rate = RateGovernor::from_hz("frame_sender", self.fps)?;

        state.set(LoopState::Running);
        info!("Frame sender running from {}", source.describe());

        while shutdown.should_continue() {
            rate.cycle_start();

            match source.capture() {
                Ok(image) => {
                    if self.num_consec_capture_failures > 0 {
                        info!(
                            "Capture recovered after {} failures",
                            self.num_consec_capture_failures
                        );
                        self.num_consec_capture_failures = 0;
                    }
                    self.stats.captured += 1;
                    self.send_frame(&image);
                }
                Err(e) => {
                    self.stats.capture_failures += 1;
                    self.num_consec_capture_failures += 1;
                    if self.num_consec_capture_failures == 1 {
                        warn!("Capture from {} failed: {}", source.describe(), e);
                    } else {
                        debug!("Capture from {} failed again: {}", source.describe(), e);
                    }
                }
            }

            rate.cycle_end();
        }

        state.set(LoopState::Draining);
        info!(
            "Frame sender stopping, {} captured, {} sent, {} dropped, {} overruns",
            self.stats.captured, self.stats.sent, self.stats.dropped_oversize, rate.num_overruns
        );

        Ok(self.stats)
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn receiver() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        socket
    }

    fn sender(port: u16, max_payload: usize) -> FrameSender {
        FrameSender::new(&CamExecParams {
            remote_address: "127.0.0.1".into(),
            remote_port: port,
            max_payload,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_oversize_frame_dropped() {
        let rx = receiver();
        let mut tx = sender(rx.local_addr().unwrap().port(), 16);

        let frame = EncodedFrame::from_bytes(vec![0xAB; 17]);
        assert_eq!(tx.send_encoded(&frame), SendOutcome::Dropped(17));
        assert_eq!(tx.stats().dropped_oversize, 1);
        assert_eq!(tx.stats().sent, 0);

        let mut buf = [0u8; 64];
        assert!(rx.recv_from(&mut buf).is_err());

        // A frame at the limit is sent whole
        let frame = EncodedFrame::from_bytes(vec![0xCD; 16]);
        assert_eq!(tx.send_encoded(&frame), SendOutcome::Sent(16));
        let (n, _) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], frame.as_bytes());
    }
}
