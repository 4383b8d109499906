//! # Mechanisms Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    ctrl::{CommandSchema, SchemaError, WireEncoding},
    eqpt::act::ActFormat,
    net::{Endpoint, SocketOptions, TransportKind},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::act_bridge::HoldPolicy;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MechExecParams {
    /// Local address the control receiver binds to
    pub bind_address: String,

    /// Local port the control receiver binds to
    pub bind_port: u16,

    /// Transport the operator station sends commands over
    pub transport: TransportKind,

    /// Encoding of received records, `auto` accepts both text and JSON
    pub encoding: WireEncoding,

    /// Read timeout on the control socket, bounds how long shutdown can take
    pub recv_timeout_ms: u64,

    /// Longest accepted record on a TCP stream, in bytes
    pub max_record_len: usize,

    /// Linux device path of the actuator controller's serial port
    pub serial_device: String,

    /// Baud rate of the actuator controller's serial port
    pub serial_baud: u32,

    /// Timeout on writes to the serial port
    pub serial_timeout_ms: u64,

    /// Frame layout expected by the actuator firmware
    pub act_format: ActFormat,

    /// Rate at which frames are written to the actuator
    pub act_rate_hz: f64,

    /// Whether the latest command is repeated every cycle or only written when it changes
    pub hold_policy: HoldPolicy,

    /// If set, the neutral command is written once no new command has arrived for this long
    pub failsafe_timeout_ms: Option<u64>,

    /// How long to wait for each loop to stop during shutdown
    pub join_timeout_ms: u64,

    /// Field ranges and text field order of received commands
    pub schema: CommandSchema,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("recv_timeout_ms must be greater than zero")]
    ZeroRecvTimeout,

    #[error("Invalid command schema: {0}")]
    InvalidSchema(#[from] SchemaError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MechExecParams {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            bind_port: 8888,
            transport: TransportKind::Udp,
            encoding: WireEncoding::Auto,
            recv_timeout_ms: 200,
            max_record_len: 1024,
            serial_device: "/dev/ttyUSB0".into(),
            serial_baud: 115_200,
            serial_timeout_ms: 50,
            act_format: ActFormat::Steering,
            act_rate_hz: 20.0,
            hold_policy: HoldPolicy::Repeat,
            failsafe_timeout_ms: None,
            join_timeout_ms: 1000,
            schema: CommandSchema::default(),
        }
    }
}

impl MechExecParams {
    /// Check the values serde can't, a zero read timeout would make the socket block forever.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.recv_timeout_ms == 0 {
            return Err(ParamsError::ZeroRecvTimeout);
        }
        self.schema.validate()?;
        Ok(())
    }

    /// The endpoint the control receiver binds to.
    pub fn ctrl_endpoint(&self) -> Endpoint {
        Endpoint::new(self.bind_address.clone(), self.bind_port, self.transport)
    }

    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            recv_timeout: Some(Duration::from_millis(self.recv_timeout_ms)),
            ..Default::default()
        }
    }

    pub fn failsafe_timeout(&self) -> Option<Duration> {
        self.failsafe_timeout_ms.map(Duration::from_millis)
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
    fn test_defaults_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mech_exec.toml");

        let p: MechExecParams = util::params::load_or_default_from_path(&path, true).unwrap();
        let reloaded: MechExecParams = util::params::load_from_path(&path).unwrap();

        assert_eq!(reloaded.bind_port, p.bind_port);
        assert_eq!(reloaded.schema, p.schema);
        assert_eq!(reloaded.hold_policy, HoldPolicy::Repeat);
        assert_eq!(reloaded.failsafe_timeout_ms, None);
    }

    #[test]
    fn test_parse() {
        let p: MechExecParams = toml::from_str(
            r#"
            transport = "tcp"
            bind_port = 5005
            act_format = "steering_throttle"
            hold_policy = "on_change"
            failsafe_timeout_ms = 500

            [schema]
            field_order = ["steering", "throttle", "brake", "handbrake"]
            "#,
        )
        .unwrap();

        assert_eq!(p.ctrl_endpoint().to_string(), "tcp://0.0.0.0:5005");
        assert_eq!(p.act_format, ActFormat::SteeringThrottle);
        assert_eq!(p.hold_policy, HoldPolicy::OnChange);
        assert_eq!(p.failsafe_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(p.schema.field_order.len(), 4);
        assert_eq!(p.schema.steering, CommandSchema::default().steering);
    }

    #[test]
    fn test_validate() {
        assert!(MechExecParams::default().validate().is_ok());

        let p: MechExecParams = toml::from_str("recv_timeout_ms = 0").unwrap();
        assert!(matches!(p.validate(), Err(ParamsError::ZeroRecvTimeout)));

        let p: MechExecParams = toml::from_str("[schema]\nfield_order = []").unwrap();
        assert!(matches!(
            p.validate(),
            Err(ParamsError::InvalidSchema(SchemaError::EmptyFieldOrder))
        ));
    }

    #[test]
    fn test_unsupported_act_format() {
        assert!(toml::from_str::<MechExecParams>("act_format = \"steering_brake\"").is_err());
    }
}
