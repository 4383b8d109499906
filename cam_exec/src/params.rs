//! # Camera Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::cam::{MAX_JPEG_QUALITY, MIN_JPEG_QUALITY},
    net::{Endpoint, TransportKind, MAX_DATAGRAM_SIZE},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CamExecParams {
    /// Address of the operator station receiving the stream
    pub remote_address: String,

    /// Port of the operator station receiving the stream
    pub remote_port: u16,

    /// Target frame rate of the stream
    pub fps: f64,

    /// JPEG quality, from 1 to 100
    pub jpeg_quality: u8,

    /// Width of the stream in pixels
    pub stream_width: u32,

    /// Height of the stream in pixels
    pub stream_height: u32,

    /// Largest encoded frame which will be sent, in bytes
    pub max_payload: usize,

    /// Size of the socket send buffer, 0 leaves the operating system default
    pub send_buffer_size: usize,

    /// Where frames come from
    pub source: SourceKind,

    /// Linux device path of the camera, used by the `v4l` source
    pub video_device: String,

    /// How long to wait for the stream loop to stop during shutdown
    pub join_timeout_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The available frame sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Generated moving test pattern
    TestPattern,

    /// V4L2 camera, requires the `v4l` feature
    V4l,
}

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("JPEG quality must be between {} and {}, found {0}", MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)]
    InvalidQuality(u8),

    #[error("The frame rate must be positive, found {0}")]
    InvalidFps(f64),

    #[error("The maximum payload must be between 1 and {} bytes, found {0}", MAX_DATAGRAM_SIZE)]
    InvalidMaxPayload(usize),

    #[error("The stream resolution must not be zero, found {0}x{1}")]
    InvalidResolution(u32, u32),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for CamExecParams {
    fn default() -> Self {
        Self {
            remote_address: "192.168.1.101".into(),
            remote_port: 8889,
            fps: 30.0,
            jpeg_quality: 80,
            stream_width: 1280,
            stream_height: 720,
            max_payload: MAX_DATAGRAM_SIZE,
            send_buffer_size: 0,
            source: SourceKind::TestPattern,
            video_device: "/dev/video0".into(),
            join_timeout_ms: 1000,
        }
    }
}

impl CamExecParams {
    /// Check the parameters are usable.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.jpeg_quality < MIN_JPEG_QUALITY || self.jpeg_quality > MAX_JPEG_QUALITY {
            return Err(ParamsError::InvalidQuality(self.jpeg_quality));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(ParamsError::InvalidFps(self.fps));
        }
        if self.max_payload == 0 || self.max_payload > MAX_DATAGRAM_SIZE {
            return Err(ParamsError::InvalidMaxPayload(self.max_payload));
        }
        if self.stream_width == 0 || self.stream_height == 0 {
            return Err(ParamsError::InvalidResolution(
                self.stream_width,
                self.stream_height,
            ));
        }

        Ok(())
    }

    /// The endpoint frames are sent to.
    pub fn remote_endpoint(&self) -> Endpoint {
        Endpoint::new(self.remote_address.clone(), self.remote_port, TransportKind::Udp)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let p = CamExecParams::default();
        assert!(p.validate().is_ok());
        assert_eq!(p.remote_endpoint().to_string(), "udp://192.168.1.101:8889");
    }

    #[test]
    fn test_validate() {
        let bad = [
            CamExecParams {
                jpeg_quality: 0,
                ..Default::default()
            },
            CamExecParams {
                jpeg_quality: 101,
                ..Default::default()
            },
            CamExecParams {
                fps: 0.0,
                ..Default::default()
            },
            CamExecParams {
                max_payload: MAX_DATAGRAM_SIZE + 1,
                ..Default::default()
            },
            CamExecParams {
                stream_height: 0,
                ..Default::default()
            },
        ];

        for p in bad.iter() {
            assert!(p.validate().is_err(), "{:?} should be invalid", p);
        }
    }

    #[test]
    fn test_parse() {
        let p: CamExecParams = toml::from_str(
            r#"
            remote_address = "127.0.0.1"
            fps = 15.0
            source = "v4l"
            "#,
        )
        .unwrap();

        assert_eq!(p.source, SourceKind::V4l);
        assert_eq!(p.fps, 15.0);
        assert_eq!(p.jpeg_quality, 80);
        assert_eq!(p.remote_endpoint().to_string(), "udp://127.0.0.1:8889");
    }
}
