//! Utility library for the teleoperation software

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod host;
pub mod logger;
pub mod maths;
pub mod params;
pub mod rate;
pub mod session;
pub mod slot;
pub mod task;
pub mod time;
