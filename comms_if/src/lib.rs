//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the software: the control command sent from
//! the operator station to the vehicle, the frames sent to the actuator and camera equipment, and
//! the socket helpers both planes are built on.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Control command definition and its wire encodings
pub mod ctrl;

/// Command and frame definitions for equipment (actuators and cameras)
pub mod eqpt;

/// Network module
pub mod net;
