//! # Ground Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    ctrl::{CommandSchema, WireEncoding},
    net::{Endpoint, SocketOptions, TransportKind},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::input::InputMapping;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GndExecParams {
    /// Address of the vehicle's control receiver
    pub remote_address: String,

    /// Port of the vehicle's control receiver
    pub ctrl_port: u16,

    /// Transport commands are sent over
    pub transport: TransportKind,

    /// Encoding of sent records. `auto` sends text.
    pub encoding: WireEncoding,

    /// Rate at which commands are sent
    pub ctrl_rate_hz: f64,

    /// How long to wait for a TCP connection to the vehicle
    pub connect_timeout_ms: u64,

    /// Send buffer of the control socket in bytes, 0 leaves the system default
    pub ctrl_send_buffer: usize,

    /// Local address the video receiver binds to
    pub video_bind_address: String,

    /// Local port the video receiver binds to
    pub video_port: u16,

    /// Receive buffer of the video socket in bytes, 0 leaves the system default
    pub video_recv_buffer: usize,

    /// Read timeout on the video socket, bounds how long shutdown can take
    pub recv_timeout_ms: u64,

    /// Joystick device used when no script is given
    pub js_device: String,

    /// Minimum interval between frames written by the snapshot display
    pub snapshot_interval_ms: u64,

    /// Rate at which the display checks for a new frame
    pub display_rate_hz: f64,

    /// How long to wait for each loop to stop during shutdown
    pub join_timeout_ms: u64,

    /// Field ranges and text field order of sent commands
    pub schema: CommandSchema,

    /// Mapping of input device axes and buttons onto command fields
    pub mapping: InputMapping,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for GndExecParams {
    fn default() -> Self {
        Self {
            remote_address: "192.168.68.110".into(),
            ctrl_port: 8888,
            transport: TransportKind::Udp,
            encoding: WireEncoding::Text,
            ctrl_rate_hz: 100.0,
            connect_timeout_ms: 2000,
            ctrl_send_buffer: 0,
            video_bind_address: "0.0.0.0".into(),
            video_port: 8889,
            video_recv_buffer: 1 << 20,
            recv_timeout_ms: 200,
            js_device: "/dev/input/js0".into(),
            snapshot_interval_ms: 1000,
            display_rate_hz: 30.0,
            join_timeout_ms: 1000,
            schema: CommandSchema::default(),
            mapping: InputMapping::default(),
        }
    }
}

impl GndExecParams {
    /// The vehicle's control endpoint.
    pub fn ctrl_endpoint(&self) -> Endpoint {
        Endpoint::new(self.remote_address.clone(), self.ctrl_port, self.transport)
    }

    /// The local endpoint video is received on.
    pub fn video_endpoint(&self) -> Endpoint {
        Endpoint::new(
            self.video_bind_address.clone(),
            self.video_port,
            TransportKind::Udp,
        )
    }

    pub fn ctrl_socket_options(&self) -> SocketOptions {
        SocketOptions {
            recv_timeout: None,
            send_buffer_size: match self.ctrl_send_buffer {
                0 => None,
                s => Some(s),
            },
            ..Default::default()
        }
    }

    pub fn video_socket_options(&self) -> SocketOptions {
        SocketOptions {
            recv_timeout: Some(Duration::from_millis(self.recv_timeout_ms)),
            recv_buffer_size: match self.video_recv_buffer {
                0 => None,
                s => Some(s),
            },
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
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
    use comms_if::ctrl::Field;

    #[test]
    fn test_defaults_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gnd_exec.toml");

        let p: GndExecParams = util::params::load_or_default_from_path(&path, true).unwrap();
        let reloaded: GndExecParams = util::params::load_from_path(&path).unwrap();

        assert_eq!(reloaded.ctrl_port, p.ctrl_port);
        assert_eq!(reloaded.encoding, WireEncoding::Text);
        assert_eq!(reloaded.schema, p.schema);
        assert_eq!(reloaded.mapping, p.mapping);
    }

    #[test]
    fn test_parse() {
        let p: GndExecParams = toml::from_str(
            r#"
            remote_address = "10.0.0.2"
            transport = "tcp"
            encoding = "json"
            ctrl_port = 5005

            [[mapping.axes]]
            field = "steering"
            axis = 3
            deadzone = 0.1

            [[mapping.buttons]]
            field = "handbrake"
            button = 0
            "#,
        )
        .unwrap();

        assert_eq!(p.ctrl_endpoint().to_string(), "tcp://10.0.0.2:5005");
        assert_eq!(p.encoding, WireEncoding::Json);
        assert_eq!(p.mapping.axes.len(), 1);
        assert_eq!(p.mapping.axes[0].field, Field::Steering);
        assert!(!p.mapping.axes[0].invert);
        assert_eq!(p.mapping.buttons[0].button, 0);
        assert_eq!(p.video_endpoint().to_string(), "udp://0.0.0.0:8889");
    }
}
