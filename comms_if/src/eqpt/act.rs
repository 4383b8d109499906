//! # Actuator Equipment Communications Module
//!
//! The actuator controller on the vehicle accepts short ASCII frames over a serial line, one frame
//! per line:
//!
//! - `S<steering>\n` for steering only firmware
//! - `S<steering>T<throttle>\n` for steering and throttle firmware
//!
//! The frame layout must match the firmware flashed on the controller, and is therefore chosen in
//! the parameters rather than at runtime.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::ctrl::ControlCommand;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The values carried in a single actuator frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActFrame {
    pub steering: i32,
    pub throttle: Option<i32>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Frame layouts understood by the actuator firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFormat {
    /// `S<int>\n`
    Steering,

    /// `S<int>T<int>\n`
    SteeringThrottle,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ActFormat {
    fn default() -> Self {
        ActFormat::Steering
    }
}

impl ActFormat {
    /// Build the frame for the given command.
    pub fn frame(&self, cmd: &ControlCommand) -> String {
        match self {
            ActFormat::Steering => format!("S{}\n", cmd.steering),
            ActFormat::SteeringThrottle => format!("S{}T{}\n", cmd.steering, cmd.throttle),
        }
    }
}

impl ActFrame {
    /// Parse a frame as written by [`ActFormat::frame`], returning `None` if it is malformed.
    pub fn parse(frame: &str) -> Option<Self> {
        let body = frame.strip_suffix('\n')?.strip_prefix('S')?;

        match body.find('T') {
            Some(i) => Some(Self {
                steering: body[..i].parse().ok()?,
                throttle: Some(body[i + 1..].parse().ok()?),
            }),
            None => Some(Self {
                steering: body.parse().ok()?,
                throttle: None,
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::ctrl::CommandSchema;

    #[test]
    fn test_frames() {
        let mut cmd = CommandSchema::default().neutral();

        assert_eq!(ActFormat::Steering.frame(&cmd), "S90\n");
        assert_eq!(ActFormat::SteeringThrottle.frame(&cmd), "S90T0\n");

        cmd.steering = 46;
        cmd.throttle = 80;
        assert_eq!(ActFormat::SteeringThrottle.frame(&cmd), "S46T80\n");
        assert_eq!(
            ActFrame::parse(&ActFormat::SteeringThrottle.frame(&cmd)),
            Some(ActFrame {
                steering: 46,
                throttle: Some(80)
            })
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            ActFrame::parse("S-12\n"),
            Some(ActFrame {
                steering: -12,
                throttle: None
            })
        );
        assert_eq!(ActFrame::parse("S90"), None);
        assert_eq!(ActFrame::parse("T90\n"), None);
        assert_eq!(ActFrame::parse("S90T\n"), None);
    }

    #[test]
    fn test_format_from_params() {
        #[derive(Deserialize)]
        struct P {
            act_format: ActFormat,
        }

        let p: P = serde_json::from_str(r#"{"act_format":"steering_throttle"}"#).unwrap();
        assert_eq!(p.act_format, ActFormat::SteeringThrottle);

        // An unsupported layout is rejected when the parameters are loaded
        assert!(serde_json::from_str::<P>(r#"{"act_format":"steering_brake"}"#).is_err());
    }
}
