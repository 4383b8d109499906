//! # Ground Library
//!
//! Operator station side of both planes:
//! - Control: operator input is read from a [`input::CommandSource`], mapped onto a control
//!   command and sent to the vehicle by the [`ctrl_client`].
//! - Video: frames from the vehicle are received by the [`cam_client`] and shown by a
//!   [`display`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod cam_client;
pub mod ctrl_client;
pub mod display;
pub mod input;
pub mod params;
