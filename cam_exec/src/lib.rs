//! # Camera Library
//!
//! Vehicle side of the video plane. Frames are captured from a [`source`], compressed to JPEG and
//! sent to the operator station one frame per datagram by the [`stream`] module.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Parameters for the camera executable.
pub mod params;

/// Image sources.
pub mod source;

/// Frame streaming over UDP.
pub mod stream;
