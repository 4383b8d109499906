//! # Camera Client Module
//!
//! Receives the vehicle's video stream. Every datagram carries one complete JPEG and is decoded on
//! its own, there is no reassembly and no ordering. Each frame which decodes is published into the
//! frame slot, replacing whatever the display has not yet picked up, so the display always shows
//! whatever decoded last.
//!
//! Datagrams which do not decode are logged and dropped, leaving the previous frame in the slot.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::{
    eqpt::cam::EncodedFrame,
    net::{self, NetError},
};
use image::DynamicImage;
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::{
    net::{SocketAddr, UdpSocket},
    sync::Arc,
    time::Instant,
};
use util::{
    rate::{Backoff, FpsCounter},
    slot::SharedLatestSlot,
    task::{LoopState, Shutdown, StateCell},
};

use crate::params::GndExecParams;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Receive buffer size, one more than the largest UDP payload.
const RECV_BUFFER_SIZE: usize = 65_536;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A frame received from the vehicle.
pub struct ReceivedFrame {
    /// Number of this frame in order of arrival, starting at 1
    pub seq: u64,

    /// Time the datagram arrived
    pub received: DateTime<Utc>,

    /// The decoded image
    pub image: DynamicImage,

    /// The JPEG as it arrived
    pub data: EncodedFrame,

    /// Receive rate over the last complete window, if one has completed
    pub fps: Option<f64>,
}

/// Receiving side of the video link.
pub struct FrameReceiver {
    socket: UdpSocket,
    local_addr: SocketAddr,
    slot: SharedLatestSlot<Arc<ReceivedFrame>>,
    fps_counter: FpsCounter,
    num_consec_decode_failures: u64,
    stats: ReceiverStats,
}

/// Counters for the video receiver, returned when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ReceiverStats {
    pub datagrams: u64,
    pub bytes_received: u64,
    pub decoded: u64,
    pub decode_failures: u64,
    pub read_errors: u64,

    /// Receive rate over the last complete window
    pub last_fps: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("Could not open the video socket: {0}")]
    SocketError(#[from] NetError),

    #[error("Could not read the local address of the video socket: {0}")]
    LocalAddrError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FrameReceiver {
    /// Bind the video socket. Failing to bind is fatal.
    pub fn bind(
        params: &GndExecParams,
        slot: SharedLatestSlot<Arc<ReceivedFrame>>,
    ) -> Result<Self, ReceiverError> {
        let socket = net::bind_udp(&params.video_endpoint(), &params.video_socket_options())?;
        let local_addr = socket.local_addr().map_err(ReceiverError::LocalAddrError)?;

        info!("Video receiver bound to {}", local_addr);

        Ok(Self {
            socket,
            local_addr,
            slot,
            fps_counter: FpsCounter::new(),
            num_consec_decode_failures: 0,
            stats: ReceiverStats::default(),
        })
    }

    /// The address the receiver is bound to, useful when binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Decode one datagram which arrived at `now` and publish it if it is a valid frame.
    pub fn handle_datagram(&mut self, data: &[u8], now: Instant) -> Option<Arc<ReceivedFrame>> {
        self.stats.datagrams += 1;
        self.stats.bytes_received += data.len() as u64;

        let data = EncodedFrame::from_bytes(data.to_vec());

        let image = match data.decode() {
            Ok(i) => i,
            Err(e) => {
                self.stats.decode_failures += 1;
                self.num_consec_decode_failures += 1;
                debug!("Discarding {} byte datagram: {}", data.len(), e);
                return None;
            }
        };

        if self.num_consec_decode_failures > 0 {
            trace!(
                "Decoded a frame after {} failures",
                self.num_consec_decode_failures
            );
            self.num_consec_decode_failures = 0;
        }

        if let Some(fps) = self.fps_counter.record_at(now) {
            self.report_fps(fps);
        }

        self.stats.decoded += 1;

        let frame = Arc::new(ReceivedFrame {
            seq: self.stats.decoded,
            received: Utc::now(),
            image,
            data,
            fps: self.fps_counter.fps(),
        });

        trace!("Frame {} received ({} bytes)", frame.seq, frame.data.len());
        self.slot.publish(frame.clone());

        Some(frame)
    }

    /// Receive frames until shutdown is requested.
    pub fn run(mut self, shutdown: &Shutdown, state: &StateCell) -> ReceiverStats {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut backoff = Backoff::default();

        state.set(LoopState::Running);
        info!("Video receiver running");

        while shutdown.should_continue() {
            match self.socket.recv_from(&mut buf) {
                Ok((n, _)) => {
                    backoff.reset();
                    self.handle_datagram(&buf[..n], Instant::now());
                }
                Err(e) if net::is_timeout(&e) => {
                    // Let the rate fall when nothing is arriving
                    if let Some(fps) = self.fps_counter.poll_at(Instant::now()) {
                        self.report_fps(fps);
                    }
                }
                Err(e) => {
                    self.stats.read_errors += 1;
                    let delay = backoff.next_delay();
                    warn!("Video socket read failed, retrying in {:?}: {}", delay, e);
                    shutdown.sleep(delay);
                }
            }
        }

        state.set(LoopState::Draining);
        info!(
            "Video receiver stopping, {} datagrams, {} decoded, {} failed to decode",
            self.stats.datagrams, self.stats.decoded, self.stats.decode_failures
        );

        self.stats
    }

    fn report_fps(&mut self, fps: f64) {
        self.stats.last_fps = Some(fps);
        info!("Receiving video at {:.1} fps", fps);
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::cam::CamImage;
    use image::{Rgb, RgbImage};
    use std::time::Duration;

    fn receiver() -> (FrameReceiver, SharedLatestSlot<Arc<ReceivedFrame>>) {
        let slot = SharedLatestSlot::new();
        let rx = FrameReceiver::bind(
            &GndExecParams {
                video_bind_address: "127.0.0.1".into(),
                video_port: 0,
                ..Default::default()
            },
            slot.clone(),
        )
        .unwrap();
        (rx, slot)
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 128]));
        CamImage::now(DynamicImage::ImageRgb8(image))
            .encode(80)
            .unwrap()
            .as_bytes()
            .to_vec()
    }

    #[test]
    fn test_valid_frame_published() {
        let (mut rx, slot) = receiver();

        let frame = rx.handle_datagram(&jpeg(64, 48), Instant::now()).unwrap();
        assert_eq!(frame.seq, 1);
        assert_eq!(frame.image.to_rgb8().dimensions(), (64, 48));
        assert_eq!(slot.peek().unwrap().seq, 1);
    }

    #[test]
    fn test_corrupt_datagram_leaves_last_frame() {
        let (mut rx, slot) = receiver();
        let t0 = Instant::now();

        let good = jpeg(32, 32);
        rx.handle_datagram(&good, t0).unwrap();

        // Random bytes, an empty datagram and a truncated JPEG
        assert!(rx.handle_datagram(&[0x13, 0x37, 0x00, 0xff], t0).is_none());
        assert!(rx.handle_datagram(&[], t0).is_none());
        assert!(rx.handle_datagram(&good[..good.len() / 2], t0).is_none());

        assert_eq!(slot.peek().unwrap().seq, 1);

        let next = rx.handle_datagram(&good, t0).unwrap();
        assert_eq!(next.seq, 2);

        let stats = rx.stats();
        assert_eq!(stats.datagrams, 5);
        assert_eq!(stats.decoded, 2);
        assert_eq!(stats.decode_failures, 3);
    }

    #[test]
    fn test_fps_window() {
        let data = jpeg(16, 16);
        let (mut rx, _slot) = receiver();
        let t0 = Instant::now();

        for i in 0..10 {
            let frame = rx
                .handle_datagram(&data, t0 + Duration::from_millis(i * 100))
                .unwrap();
            assert_eq!(frame.fps, None);
        }

        // The first frame past the end of the window closes it
        let frame = rx
            .handle_datagram(&data, t0 + Duration::from_millis(1000))
            .unwrap();
        let fps = frame.fps.unwrap();
        assert!(fps > 9.0 && fps <= 10.0, "fps was {}", fps);
        assert_eq!(rx.stats().last_fps, Some(fps));
    }
}
