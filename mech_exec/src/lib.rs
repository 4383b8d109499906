//! # Mechanisms Library
//!
//! Vehicle side of the control plane. The [`ctrl_server`] receives commands from the operator
//! station and publishes them into a shared slot, the [`act_bridge`] reads that slot at a fixed
//! rate and writes actuator frames to a [`sink`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Fixed rate writer of actuator frames.
pub mod act_bridge;

/// Control link receiver.
pub mod ctrl_server;

/// Parameters for the mechanisms executable.
pub mod params;

/// Outputs for actuator frames.
pub mod sink;
