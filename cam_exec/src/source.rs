//! # Frame Sources
//!
//! A [`FrameSource`] produces one image per call. The [`TestPattern`] is always available and is
//! used for bench testing without a camera, the [`V4lCamera`] is only built with the `v4l`
//! feature.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::cam::{CamImage, FrameError};
use image::{DynamicImage, Rgb, RgbImage};
use log::info;

use crate::params::{CamExecParams, SourceKind};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something which produces camera images.
pub trait FrameSource: Send {
    /// Acquire the next image, blocking until it is available.
    fn capture(&mut self) -> Result<CamImage, SourceError>;

    /// Human readable description used in logs.
    fn describe(&self) -> String;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A moving colour gradient.
pub struct TestPattern {
    width: u32,
    height: u32,
    frame_num: u32,
}

/// A V4L2 camera producing MJPEG frames.
#[cfg(feature = "v4l")]
pub struct V4lCamera {
    device: String,
    camera: rscam::Camera,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("The {0} source is not available in this build")]
    Unavailable(String),

    #[error("Could not open camera {0}: {1}")]
    OpenError(String, std::io::Error),

    #[cfg(feature = "v4l")]
    #[error("Could not start camera {0}: {1}")]
    StartError(String, rscam::Error),

    #[error("Could not capture a frame: {0}")]
    CaptureError(std::io::Error),

    #[error("Could not decode the captured frame: {0}")]
    DecodeError(FrameError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_num: 0,
        }
    }
}

impl FrameSource for TestPattern {
    fn capture(&mut self) -> Result<CamImage, SourceError> {
        let offset = self.frame_num.wrapping_mul(4);
        self.frame_num = self.frame_num.wrapping_add(1);

        let image = RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                (x.wrapping_add(offset) % 256) as u8,
                (y.wrapping_add(offset) % 256) as u8,
                ((x + y) / 8 % 256) as u8,
            ])
        });

        Ok(CamImage::now(DynamicImage::ImageRgb8(image)))
    }

    fn describe(&self) -> String {
        format!("test_pattern {}x{}", self.width, self.height)
    }
}

#[cfg(feature = "v4l")]
impl V4lCamera {
    /// Open and start the camera at the given resolution and frame rate.
    pub fn open(device: &str, resolution: (u32, u32), fps: u32) -> Result<Self, SourceError> {
        let mut camera = rscam::Camera::new(device)
            .map_err(|e| SourceError::OpenError(device.into(), e))?;

        camera
            .start(&rscam::Config {
                interval: (1, fps.max(1)),
                resolution,
                format: b"MJPG",
                ..Default::default()
            })
            .map_err(|e| SourceError::StartError(device.into(), e))?;

        Ok(Self {
            device: device.into(),
            camera,
        })
    }
}

#[cfg(feature = "v4l")]
impl FrameSource for V4lCamera {
    fn capture(&mut self) -> Result<CamImage, SourceError> {
        let frame = self.camera.capture().map_err(SourceError::CaptureError)?;
        let image = comms_if::eqpt::cam::decode_jpeg(&frame).map_err(SourceError::DecodeError)?;

        Ok(CamImage::now(image))
    }

    fn describe(&self) -> String {
        format!("v4l:{}", self.device)
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn capture(&mut self) -> Result<CamImage, SourceError> {
        (**self).capture()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Open the source selected in the parameters.
pub fn open_source(params: &CamExecParams) -> Result<Box<dyn FrameSource>, SourceError> {
    let source: Box<dyn FrameSource> = match params.source {
        SourceKind::TestPattern => {
            Box::new(TestPattern::new(params.stream_width, params.stream_height))
        }
        SourceKind::V4l => open_v4l(params)?,
    };

    info!("Opened frame source {}", source.describe());

    Ok(source)
}

#[cfg(feature = "v4l")]
fn open_v4l(params: &CamExecParams) -> Result<Box<dyn FrameSource>, SourceError> {
    Ok(Box::new(V4lCamera::open(
        &params.video_device,
        (params.stream_width, params.stream_height),
        params.fps.round() as u32,
    )?))
}

#[cfg(not(feature = "v4l"))]
fn open_v4l(_params: &CamExecParams) -> Result<Box<dyn FrameSource>, SourceError> {
    Err(SourceError::Unavailable("v4l".into()))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pattern_moves() {
        let mut source = TestPattern::new(64, 48);

        let a = source.capture().unwrap();
        let b = source.capture().unwrap();

        assert_eq!(a.dimensions(), (64, 48));
        assert_ne!(a.image.to_rgb8().into_raw(), b.image.to_rgb8().into_raw());
    }

    #[test]
    fn test_open_source() {
        let params = CamExecParams {
            stream_width: 32,
            stream_height: 16,
            ..Default::default()
        };
        let mut source = open_source(&params).unwrap();
        assert_eq!(source.capture().unwrap().dimensions(), (32, 16));
    }

    #[cfg(not(feature = "v4l"))]
    #[test]
    fn test_v4l_unavailable() {
        let params = CamExecParams {
            source: SourceKind::V4l,
            ..Default::default()
        };
        assert!(matches!(open_source(&params), Err(SourceError::Unavailable(_))));
    }
}
