//! # Control Command Interface
//!
//! Defines the [`ControlCommand`] sent from the operator station to the vehicle, the
//! [`CommandSchema`] which bounds each of its fields, and the [`WireEncoding`] used to carry it on
//! the network.
//!
//! Two encodings are supported:
//!
//! - Delimited text, see [`text`]: `45,80,0,0,1\n`
//! - JSON documents, see [`json`]: `{"steering":45,"throttle":80,"brake":0,"clutch":0,"handbrake":1}`
//!
//! Decoding never wraps or silently clamps a value. A record which is missing a field, contains a
//! non-integer, or contains a value outside of the schema's range is rejected with a
//! [`DecodeError`]. Senders are expected to clamp with [`CommandSchema::clamp`] before encoding.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod json;
pub mod text;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single control demand from the operator.
///
/// Two commands are equal when they demand the same values. The timestamp records when the demand
/// was sampled and is not compared, the text encoding does not carry it.
#[derive(Debug, Clone, Copy)]
pub struct ControlCommand {
    /// Steering demand
    pub steering: i32,

    /// Throttle pedal demand
    pub throttle: i32,

    /// Brake pedal demand
    pub brake: i32,

    /// Clutch pedal demand
    pub clutch: i32,

    /// Handbrake demand, normally either 0 or 1
    pub handbrake: i32,

    /// UTC time at which the demand was sampled, if known. Millisecond resolution on the wire.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Inclusive range of values a field may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRange {
    pub min: i32,
    pub max: i32,
}

/// Declares the valid range of every field in a [`ControlCommand`] and the order in which fields
/// appear in the delimited text encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSchema {
    /// Fields carried on the wire, in order. Fields not in this list are not transmitted and take
    /// their neutral value on decode.
    pub field_order: Vec<Field>,

    pub steering: FieldRange,
    pub throttle: FieldRange,
    pub brake: FieldRange,
    pub clutch: FieldRange,
    pub handbrake: FieldRange,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The named fields of a [`ControlCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Steering,
    Throttle,
    Brake,
    Clutch,
    Handbrake,
}

/// The encoding used to carry a [`ControlCommand`] on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireEncoding {
    /// Detect the encoding of each record when decoding. A record whose first non-whitespace
    /// character is `{` is treated as JSON, anything else as delimited text. Encodes as delimited
    /// text.
    Auto,

    /// Comma separated integers terminated by a newline.
    Text,

    /// A single line JSON object.
    Json,
}

/// Errors which can occur while decoding a control record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("The record is empty")]
    Empty,

    #[error("The record is not valid UTF-8")]
    NonUtf8,

    #[error("Expected {expected} fields but found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("The {0} field is missing")]
    MissingField(Field),

    #[error("The {0} field is not an integer (got {1:?})")]
    NotInteger(Field, String),

    #[error("The {field} field value {value} is outside of the range [{min}, {max}]")]
    OutOfRange {
        field: Field,
        value: i64,
        min: i32,
        max: i32,
    },

    #[error("The timestamp {0} is not a valid time")]
    InvalidTimestamp(i64),

    #[error("Malformed JSON document: {0}")]
    Json(String),
}

/// Errors in the declaration of a [`CommandSchema`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("The field order is empty")]
    EmptyFieldOrder,

    #[error("The {0} field appears more than once in the field order")]
    DuplicateField(Field),

    #[error("The {0} field has a minimum ({1}) greater than its maximum ({2})")]
    InvertedRange(Field, i32, i32),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControlCommand {
    /// Get the value of the given field.
    pub fn get(&self, field: Field) -> i32 {
        match field {
            Field::Steering => self.steering,
            Field::Throttle => self.throttle,
            Field::Brake => self.brake,
            Field::Clutch => self.clutch,
            Field::Handbrake => self.handbrake,
        }
    }

    /// Set the value of the given field.
    pub fn set(&mut self, field: Field, value: i32) {
        match field {
            Field::Steering => self.steering = value,
            Field::Throttle => self.throttle = value,
            Field::Brake => self.brake = value,
            Field::Clutch => self.clutch = value,
            Field::Handbrake => self.handbrake = value,
        }
    }

    /// Set the timestamp, truncated to the millisecond resolution carried by the JSON encoding.
    pub fn stamp(&mut self, at: DateTime<Utc>) {
        self.timestamp = Some(at.trunc_subsecs(3));
    }
}

impl PartialEq for ControlCommand {
    fn eq(&self, other: &Self) -> bool {
        Field::ALL.iter().all(|f| self.get(*f) == other.get(*f))
    }
}

impl Eq for ControlCommand {}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "steer={} thr={} brk={} clu={} hb={}",
            self.steering, self.throttle, self.brake, self.clutch, self.handbrake
        )
    }
}

impl FieldRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.min as i64 && value <= self.max as i64
    }

    pub fn clamp(&self, value: i32) -> i32 {
        value.max(self.min).min(self.max)
    }

    /// Midpoint of the range, rounded towards the minimum.
    pub fn centre(&self) -> i32 {
        (self.min as i64 + (self.max as i64 - self.min as i64) / 2) as i32
    }
}

impl Default for CommandSchema {
    fn default() -> Self {
        Self {
            field_order: Field::ALL.to_vec(),
            steering: FieldRange::new(0, 180),
            throttle: FieldRange::new(0, 100),
            brake: FieldRange::new(0, 100),
            clutch: FieldRange::new(0, 100),
            handbrake: FieldRange::new(0, 1),
        }
    }
}

impl CommandSchema {
    /// Get the range of the given field.
    pub fn range(&self, field: Field) -> FieldRange {
        match field {
            Field::Steering => self.steering,
            Field::Throttle => self.throttle,
            Field::Brake => self.brake,
            Field::Clutch => self.clutch,
            Field::Handbrake => self.handbrake,
        }
    }

    /// Check that the schema is self-consistent.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.field_order.is_empty() {
            return Err(SchemaError::EmptyFieldOrder);
        }

        for (i, field) in self.field_order.iter().enumerate() {
            if self.field_order[..i].contains(field) {
                return Err(SchemaError::DuplicateField(*field));
            }
        }

        for field in Field::ALL.iter() {
            let r = self.range(*field);
            if r.min > r.max {
                return Err(SchemaError::InvertedRange(*field, r.min, r.max));
            }
        }

        Ok(())
    }

    /// The safe command used when nothing else is known.
    ///
    /// Steering is centred in its range, every other field takes the in-range value closest to
    /// zero.
    pub fn neutral(&self) -> ControlCommand {
        let mut cmd = ControlCommand {
            steering: self.steering.centre(),
            throttle: 0,
            brake: 0,
            clutch: 0,
            handbrake: 0,
            timestamp: None,
        };

        for field in [Field::Throttle, Field::Brake, Field::Clutch, Field::Handbrake].iter() {
            cmd.set(*field, self.range(*field).clamp(0));
        }

        cmd
    }

    /// Clamp every field of the command into its range.
    pub fn clamp(&self, cmd: &ControlCommand) -> ControlCommand {
        let mut clamped = *cmd;
        for field in Field::ALL.iter() {
            clamped.set(*field, self.range(*field).clamp(cmd.get(*field)));
        }
        clamped
    }

    /// Check a decoded value against the field's range, converting it into the field type.
    pub fn check(&self, field: Field, value: i64) -> Result<i32, DecodeError> {
        let range = self.range(field);
        if range.contains(value) {
            Ok(value as i32)
        } else {
            Err(DecodeError::OutOfRange {
                field,
                value,
                min: range.min,
                max: range.max,
            })
        }
    }
}

impl Field {
    /// All fields, in their default wire order.
    pub const ALL: [Field; 5] = [
        Field::Steering,
        Field::Throttle,
        Field::Brake,
        Field::Clutch,
        Field::Handbrake,
    ];

    /// The key used for this field in JSON documents.
    pub fn name(&self) -> &'static str {
        match self {
            Field::Steering => "steering",
            Field::Throttle => "throttle",
            Field::Brake => "brake",
            Field::Clutch => "clutch",
            Field::Handbrake => "handbrake",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Default for WireEncoding {
    fn default() -> Self {
        WireEncoding::Auto
    }
}

impl WireEncoding {
    /// Decode a single record.
    ///
    /// Leading and trailing whitespace, including the record terminator, is ignored.
    pub fn decode(
        &self,
        record: &[u8],
        schema: &CommandSchema,
    ) -> Result<ControlCommand, DecodeError> {
        let record = std::str::from_utf8(record).map_err(|_| DecodeError::NonUtf8)?;
        let record = record.trim();

        if record.is_empty() {
            return Err(DecodeError::Empty);
        }

        match self {
            WireEncoding::Text => text::decode(record, schema),
            WireEncoding::Json => json::decode(record, schema),
            WireEncoding::Auto => {
                if record.starts_with('{') {
                    json::decode(record, schema)
                } else {
                    text::decode(record, schema)
                }
            }
        }
    }

    /// Encode a command into a newline terminated record.
    ///
    /// The command is clamped into the schema before encoding.
    pub fn encode(&self, cmd: &ControlCommand, schema: &CommandSchema) -> String {
        let cmd = schema.clamp(cmd);
        match self {
            WireEncoding::Text | WireEncoding::Auto => text::encode(&cmd, schema),
            WireEncoding::Json => json::encode(&cmd, schema),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
