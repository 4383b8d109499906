//! # Equipment Interface
//!
//! This module defines the interface structures which are sent to or produced by equipment on the
//! vehicle.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod act;
pub mod cam;
