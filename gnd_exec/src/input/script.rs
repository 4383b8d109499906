//! # Input script module
//!
//! Replays operator input from a script rather than a device, for repeatable bench tests. A script
//! is a list of entries, each a time in seconds and a [`RawInput`] as JSON, terminated by `;`:
//!
//! ```text
//! 0.0: {"axes": [0.0, 0.0, 1.0, 1.0], "buttons": [false, false, false, false, false, true]};
//! 1.5: {"axes": [-0.5, 0.0, 0.2, 1.0]};
//! 3.0: {};
//! ```
//!
//! Times are measured from the first poll. Each poll reports the latest entry whose time has
//! passed, or an idle device before the first entry. Once the last entry has been reported the
//! script is over and the source returns [`Sample::EndOfInput`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use regex::RegexBuilder;
use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    time::Instant,
};
use thiserror::Error;

use super::{CommandSource, RawInput, Sample, SourceError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An input state which is scripted to occur at a specific time.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Time at which the input takes effect
    pub exec_time_s: f64,

    pub input: RawInput,
}

/// Command source replaying a script.
#[derive(Debug)]
pub struct ScriptSource {
    name: String,
    entries: VecDeque<Entry>,
    current: RawInput,
    start: Option<Instant>,
    duration_s: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not load the script {0:?}: {1}")]
    ScriptLoadError(PathBuf, std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error("Could not build the script pattern: {0}")]
    PatternError(regex::Error),

    #[error("Script contains an invalid timestamp: {0}. Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script entries must be in time order, {0} s comes after {1} s")]
    OutOfOrder(f64, f64),

    #[error("Script contains invalid input at {0} s: {1}")]
    InvalidInput(f64, serde_json::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ScriptSource {
    /// Load a script from the given path.
    pub fn load<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {
        let path = script_path.as_ref();

        let script = fs::read_to_string(path)
            .map_err(|e| ScriptError::ScriptLoadError(path.to_path_buf(), e))?;

        Self::parse(&path.display().to_string(), &script)
    }

    /// Parse a script from a string.
    pub fn parse(name: &str, script: &str) -> Result<Self, ScriptError> {
        // Go through the script executing __the magic regex__.
        let re = RegexBuilder::new(r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);")
            .multi_line(true)
            .build()
            .map_err(ScriptError::PatternError)?;

        let mut entries: VecDeque<Entry> = VecDeque::new();

        for cap in re.captures_iter(script) {
            let (time_str, payload) = match (cap.get(1), cap.get(3)) {
                (Some(t), Some(p)) => (t.as_str(), p.as_str()),
                _ => continue,
            };

            let exec_time_s: f64 = time_str
                .parse()
                .map_err(|e| ScriptError::InvalidTimestamp(format!("{}", e)))?;

            if let Some(last) = entries.back() {
                if exec_time_s < last.exec_time_s {
                    return Err(ScriptError::OutOfOrder(exec_time_s, last.exec_time_s));
                }
            }

            let input: RawInput = serde_json::from_str(payload)
                .map_err(|e| ScriptError::InvalidInput(exec_time_s, e))?;

            entries.push_back(Entry { exec_time_s, input });
        }

        let duration_s = match entries.back() {
            Some(e) => e.exec_time_s,
            None => return Err(ScriptError::ScriptEmpty),
        };

        Ok(Self {
            name: name.into(),
            entries,
            current: RawInput::default(),
            start: None,
            duration_s,
        })
    }

    /// Get the number of entries left in the script
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Get the length of the script in seconds
    pub fn duration_s(&self) -> f64 {
        self.duration_s
    }

    /// Poll the script as if at the given time.
    pub fn poll_at(&mut self, now: Instant) -> Sample {
        let start = *self.start.get_or_insert(now);
        let elapsed_s = now.saturating_duration_since(start).as_secs_f64();

        if self.entries.is_empty() {
            return Sample::EndOfInput;
        }

        while let Some(entry) = self.entries.front() {
            if entry.exec_time_s > elapsed_s {
                break;
            }
            if let Some(entry) = self.entries.pop_front() {
                self.current = entry.input;
            }
        }

        Sample::Input(self.current.clone())
    }
}

impl CommandSource for ScriptSource {
    fn poll(&mut self) -> Result<Sample, SourceError> {
        Ok(self.poll_at(Instant::now()))
    }

    fn describe(&self) -> String {
        format!("script:{} ({:.1} s)", self.name, self.duration_s)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
