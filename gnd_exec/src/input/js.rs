//! # Joystick Source
//!
//! Reads a Linux joystick device (`/dev/input/jsN`). The device produces 8 byte events:
//!
//! | bytes | type  | contents                          |
//! |-------|-------|-----------------------------------|
//! | 0..4  | `u32` | timestamp in ms                   |
//! | 4..6  | `i16` | value                             |
//! | 6     | `u8`  | type, `0x01` button, `0x02` axis  |
//! | 7     | `u8`  | axis or button number             |
//!
//! Events with `0x80` set in the type report the initial state of the device on open.
//!
//! Reads from the device block until the operator moves something, so they happen on a background
//! thread which keeps the latest [`RawInput`]. Polling the source only copies that state.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};
use std::{
    fs::File,
    io::Read,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
};

use super::{CommandSource, RawInput, Sample, SourceError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Size of one joystick event in bytes.
pub const JS_EVENT_SIZE: usize = 8;

const JS_EVENT_BUTTON: u8 = 0x01;
const JS_EVENT_AXIS: u8 = 0x02;
const JS_EVENT_INIT: u8 = 0x80;

/// Axis and button numbers at or above this are ignored.
const MAX_CONTROL_NUMBER: usize = 64;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single event read from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsEvent {
    pub time_ms: u32,
    pub value: i16,
    pub kind: JsEventKind,
    pub number: u8,
    pub init: bool,
}

pub struct JoystickSource {
    name: String,
    state: Arc<Mutex<RawInput>>,
    alive: Arc<AtomicBool>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsEventKind {
    Button,
    Axis,
    Unknown(u8),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl JsEvent {
    pub fn parse(buf: &[u8; JS_EVENT_SIZE]) -> Self {
        let kind_byte = buf[6];

        let kind = match kind_byte & !JS_EVENT_INIT {
            JS_EVENT_BUTTON => JsEventKind::Button,
            JS_EVENT_AXIS => JsEventKind::Axis,
            k => JsEventKind::Unknown(k),
        };

        Self {
            time_ms: LittleEndian::read_u32(&buf[0..4]),
            value: LittleEndian::read_i16(&buf[4..6]),
            kind,
            number: buf[7],
            init: kind_byte & JS_EVENT_INIT != 0,
        }
    }

    /// Update the input state with this event.
    ///
    /// Returns false if the event was ignored.
    pub fn apply(&self, input: &mut RawInput) -> bool {
        let n = self.number as usize;
        if n >= MAX_CONTROL_NUMBER {
            return false;
        }

        match self.kind {
            JsEventKind::Axis => {
                if input.axes.len() <= n {
                    input.axes.resize(n + 1, 0.0);
                }
                input.axes[n] = (self.value as f64 / i16::MAX as f64).max(-1.0);
                true
            }
            JsEventKind::Button => {
                if input.buttons.len() <= n {
                    input.buttons.resize(n + 1, false);
                }
                input.buttons[n] = self.value != 0;
                true
            }
            JsEventKind::Unknown(_) => false,
        }
    }
}

impl JoystickSource {
    /// Open a joystick device and start reading it.
    pub fn open(device: &str) -> Result<Self, SourceError> {
        let file = File::open(device).map_err(|e| SourceError::OpenError(device.into(), e))?;
        Self::from_reader(device, file)
    }

    /// Start reading joystick events from any reader.
    ///
    /// The reader thread is not joined. It ends when the reader returns an error or end of file.
    pub fn from_reader<R: Read + Send + 'static>(name: &str, reader: R) -> Result<Self, SourceError> {
        let state = Arc::new(Mutex::new(RawInput::default()));
        let alive = Arc::new(AtomicBool::new(true));

        let thread_state = state.clone();
        let thread_alive = alive.clone();
        let thread_name = name.to_string();

        thread::Builder::new()
            .name("js_reader".into())
            .spawn(move || read_events(reader, &thread_name, &thread_state, &thread_alive))
            .map_err(SourceError::ThreadError)?;

        info!("Reading joystick {}", name);

        Ok(Self {
            name: name.into(),
            state,
            alive,
        })
    }

    /// Whether the device is still being read.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// The latest input state, whether or not the device is still connected.
    pub fn latest(&self) -> RawInput {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CommandSource for JoystickSource {
    fn poll(&mut self) -> Result<Sample, SourceError> {
        if !self.is_alive() {
            return Err(SourceError::Disconnected(self.name.clone()));
        }

        Ok(Sample::Input(self.latest()))
    }

    fn describe(&self) -> String {
        format!("joystick:{}", self.name)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn read_events<R: Read>(mut reader: R, name: &str, state: &Mutex<RawInput>, alive: &AtomicBool) {
    let mut buf = [0u8; JS_EVENT_SIZE];

    loop {
        if let Err(e) = reader.read_exact(&mut buf) {
            warn!("Stopped reading joystick {}: {}", name, e);
            break;
        }

        let event = JsEvent::parse(&buf);

        let mut input = state.lock().unwrap_or_else(PoisonError::into_inner);
        if !event.apply(&mut input) {
            debug!("Ignoring joystick event {:?}", event);
        }
    }

    alive.store(false, Ordering::SeqCst);
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::{
        io::Cursor,
        time::{Duration, Instant},
    };

    fn event(time_ms: u32, value: i16, kind: u8, number: u8) -> [u8; JS_EVENT_SIZE] {
        let mut buf = [0u8; JS_EVENT_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], time_ms);
        LittleEndian::write_i16(&mut buf[4..6], value);
        buf[6] = kind;
        buf[7] = number;
        buf
    }

    #[test]
    fn test_parse() {
        let e = JsEvent::parse(&event(1234, -32767, JS_EVENT_AXIS | JS_EVENT_INIT, 3));
        assert_eq!(e.time_ms, 1234);
        assert_eq!(e.value, -32767);
        assert_eq!(e.kind, JsEventKind::Axis);
        assert_eq!(e.number, 3);
        assert!(e.init);

        let e = JsEvent::parse(&event(0, 1, JS_EVENT_BUTTON, 5));
        assert_eq!(e.kind, JsEventKind::Button);
        assert!(!e.init);
    }

    #[test]
    fn test_apply() {
        let mut input = RawInput::default();

        assert!(JsEvent::parse(&event(0, i16::MAX, JS_EVENT_AXIS, 2)).apply(&mut input));
        assert!(JsEvent::parse(&event(0, i16::MIN, JS_EVENT_AXIS, 0)).apply(&mut input));
        assert!(JsEvent::parse(&event(0, 1, JS_EVENT_BUTTON, 5)).apply(&mut input));
        assert!(!JsEvent::parse(&event(0, 1, 0x04, 0)).apply(&mut input));
        assert!(!JsEvent::parse(&event(0, 1, JS_EVENT_AXIS, 200)).apply(&mut input));

        assert_eq!(input.axes, vec![-1.0, 0.0, 1.0]);
        assert_eq!(input.buttons, vec![false, false, false, false, false, true]);
    }

    #[test]
    fn test_source_reports_disconnect() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&event(0, 0, JS_EVENT_AXIS | JS_EVENT_INIT, 0));
        bytes.extend_from_slice(&event(10, 1, JS_EVENT_BUTTON, 1));

        let mut source = JoystickSource::from_reader("test", Cursor::new(bytes)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        while source.is_alive() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(source.latest().buttons, vec![false, true]);
        assert!(matches!(source.poll(), Err(SourceError::Disconnected(_))));
    }
}
