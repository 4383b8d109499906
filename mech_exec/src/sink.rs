//! # Actuator Sinks
//!
//! A sink is the byte-oriented output the actuator bridge writes frames to. On the vehicle this is
//! the serial link to the actuator controller, for dry runs it is the log.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use serialport::SerialPort;
use std::{
    io::Write,
    time::{Duration, Instant},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Minimum time between attempts to reopen a failed serial port.
const REOPEN_INTERVAL: Duration = Duration::from_secs(1);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// An output which actuator frames are written to.
pub trait ActuatorSink: Send {
    /// Write one complete frame. The frame is either written whole or an error is returned.
    fn write_frame(&mut self, frame: &str) -> Result<(), SinkError>;

    /// Human readable description used in logs.
    fn describe(&self) -> String;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Serial port connected to the actuator controller.
///
/// If a write fails the port is closed and reopened on a later write, at most once per
/// [`REOPEN_INTERVAL`], so a controller that is unplugged and plugged back in recovers.
pub struct SerialSink {
    path: String,
    baud: u32,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
    last_open_attempt: Instant,
}

/// Sink which logs every frame instead of writing it to hardware.
#[derive(Default)]
pub struct LogSink {
    num_frames: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Could not open serial port {0}: {1}")]
    OpenError(String, serialport::Error),

    #[error("Serial port {0} is closed, waiting to reopen")]
    NotOpen(String),

    #[error("Could not write to the sink: {0}")]
    WriteError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SerialSink {
    /// Open the serial port. Failing to open it here is an error, later failures are recovered
    /// from.
    pub fn open(path: &str, baud: u32, timeout: Duration) -> Result<Self, SinkError> {
        let port = open_port(path, baud, timeout)?;

        info!("Opened serial port {} at {} baud", path, baud);

        Ok(Self {
            path: path.into(),
            baud,
            timeout,
            port: Some(port),
            last_open_attempt: Instant::now(),
        })
    }

    fn reopen(&mut self) -> Result<(), SinkError> {
        if self.last_open_attempt.elapsed() < REOPEN_INTERVAL {
            return Err(SinkError::NotOpen(self.path.clone()));
        }
        self.last_open_attempt = Instant::now();

        let port = open_port(&self.path, self.baud, self.timeout)?;
        info!("Reopened serial port {}", self.path);
        self.port = Some(port);

        Ok(())
    }
}

impl ActuatorSink for SerialSink {
    fn write_frame(&mut self, frame: &str) -> Result<(), SinkError> {
        if self.port.is_none() {
            self.reopen()?;
        }

        let port = match self.port.as_mut() {
            Some(p) => p,
            None => return Err(SinkError::NotOpen(self.path.clone())),
        };

        let result = port
            .write_all(frame.as_bytes())
            .and_then(|_| port.flush());

        if let Err(e) = result {
            warn!("Write to {} failed, closing the port: {}", self.path, e);
            self.port = None;
            self.last_open_attempt = Instant::now();
            return Err(SinkError::WriteError(e));
        }

        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial:{}@{}", self.path, self.baud)
    }
}

impl<T: ActuatorSink + ?Sized> ActuatorSink for Box<T> {
    fn write_frame(&mut self, frame: &str) -> Result<(), SinkError> {
        (**self).write_frame(frame)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_frames(&self) -> u64 {
        self.num_frames
    }
}

impl ActuatorSink for LogSink {
    fn write_frame(&mut self, frame: &str) -> Result<(), SinkError> {
        self.num_frames += 1;
        info!("Actuator frame {}: {:?}", self.num_frames, frame);
        Ok(())
    }

    fn describe(&self) -> String {
        "log".into()
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn open_port(path: &str, baud: u32, timeout: Duration) -> Result<Box<dyn SerialPort>, SinkError> {
    serialport::new(path, baud)
        .timeout(timeout)
        .open()
        .map_err(|e| SinkError::OpenError(path.into(), e))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_open_missing_port() {
        let result = SerialSink::open(
            "/dev/this_port_does_not_exist",
            115_200,
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(SinkError::OpenError(_, _))));
    }

    #[test]
    fn test_log_sink() {
        let mut sink = LogSink::new();
        sink.write_frame("S90\n").unwrap();
        sink.write_frame("S91\n").unwrap();
        assert_eq!(sink.num_frames(), 2);
        assert_eq!(sink.describe(), "log");
    }
}
