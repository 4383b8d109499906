//! # Camera Equipment Communications Module
//!
//! Each frame travels over the video link as a single datagram containing one complete JPEG image.
//! There is no header or sequence number, a datagram either decodes on its own or it is discarded.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use image::{DynamicImage, GenericImageView, ImageOutputFormat};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Lowest accepted JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Highest accepted JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A decoded image along with the time it was acquired.
#[derive(Clone)]
pub struct CamImage {
    /// UTC timestamp at which the frame was acquired
    pub timestamp: DateTime<Utc>,

    /// The image itself
    pub image: DynamicImage,
}

/// A JPEG compressed image, exactly as it is carried in a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    data: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Could not encode the image: {0}")]
    EncodeError(image::ImageError),

    #[error("Could not decode the frame: {0}")]
    DecodeError(image::ImageError),

    #[error("The frame is empty")]
    Empty,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CamImage {
    /// Create a new image acquired now.
    pub fn now(image: DynamicImage) -> Self {
        Self {
            timestamp: Utc::now(),
            image,
        }
    }

    /// Width and height of the image in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Compress this image to JPEG at the given quality, which is clamped into the range 1 to 100.
    pub fn encode(&self, quality: u8) -> Result<EncodedFrame, FrameError> {
        let quality = quality.max(MIN_JPEG_QUALITY).min(MAX_JPEG_QUALITY);

        let mut data = Vec::<u8>::new();
        self.image
            .write_to(&mut data, ImageOutputFormat::Jpeg(quality))
            .map_err(FrameError::EncodeError)?;

        Ok(EncodedFrame { data })
    }
}

impl EncodedFrame {
    /// Wrap bytes received from the network.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the frame into an image.
    pub fn decode(&self) -> Result<DynamicImage, FrameError> {
        decode_jpeg(&self.data)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Decode a JPEG image from a buffer. Truncated or corrupt buffers are an error.
pub fn decode_jpeg(data: &[u8]) -> Result<DynamicImage, FrameError> {
    if data.is_empty() {
        return Err(FrameError::Empty);
    }

    image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(FrameError::DecodeError)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> CamImage {
        CamImage::now(DynamicImage::ImageRgb8(RgbImage::from_fn(
            width,
            height,
            |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]),
        )))
    }

    #[test]
    fn test_round_trip_keeps_dimensions() {
        let img = gradient(320, 240);

        for q in [1u8, 50, 80, 100].iter() {
            let frame = img.encode(*q).unwrap();
            assert!(!frame.is_empty());
            assert_eq!(frame.decode().unwrap().dimensions(), (320, 240));
        }
    }

    #[test]
    fn test_quality_is_clamped() {
        let img = gradient(16, 16);
        assert_eq!(img.encode(0).unwrap(), img.encode(1).unwrap());
        assert_eq!(img.encode(255).unwrap(), img.encode(100).unwrap());
    }

    #[test]
    fn test_quality_changes_size() {
        let img = gradient(256, 256);
        assert!(img.encode(10).unwrap().len() < img.encode(95).unwrap().len());
    }

    #[test]
    fn test_corrupt_frames() {
        let frame = gradient(64, 64).encode(80).unwrap();

        // Cut off inside the header
        let head = frame.as_bytes()[..20].to_vec();
        assert!(EncodedFrame::from_bytes(head).decode().is_err());

        // Missing the start of the image
        let tail = frame.as_bytes()[frame.len() / 2..].to_vec();
        assert!(EncodedFrame::from_bytes(tail).decode().is_err());

        // Not an image
        assert!(matches!(
            decode_jpeg(b"45,80,0,0,1\n"),
            Err(FrameError::DecodeError(_))
        ));
        assert!(matches!(decode_jpeg(&[]), Err(FrameError::Empty)));
    }
}
