//! # Operator Input
//!
//! Operator input arrives as [`RawInput`], a snapshot of every axis and button of the input
//! device, from a [`CommandSource`]. The [`InputMapper`] then turns each snapshot into a
//! [`ControlCommand`] within the command schema.
//!
//! Axes are in `[-1, 1]`. Each mapped axis is clamped, has its deadzone applied, is optionally
//! inverted and is then scaled linearly onto its field's range, so with the default mapping:
//!
//! | field     | input    | rest   | full       |
//! |-----------|----------|--------|------------|
//! | steering  | axis 0   | 90     | 0 / 180    |
//! | throttle  | axis 2   | 0      | 100        |
//! | brake     | axis 3   | 0      | 100        |
//! | clutch    | axis 1   | 0      | 100        |
//! | handbrake | button 5 | 0      | 1          |
//!
//! Pedal axes rest at `+1` and are therefore inverted. A field whose axis or button is missing
//! from the snapshot takes its neutral value.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod js;
pub mod script;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ctrl::{CommandSchema, ControlCommand, Field};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use util::maths::{clamp, deadzone, lin_map};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something which produces operator input.
pub trait CommandSource: Send {
    /// Get the current input. Must not block for longer than a control cycle.
    fn poll(&mut self) -> Result<Sample, SourceError>;

    /// Human readable description used in logs.
    fn describe(&self) -> String;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// State of every axis and button of an input device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawInput {
    /// Axis positions in `[-1, 1]`
    pub axes: Vec<f64>,

    /// Button states, `true` if pressed
    pub buttons: Vec<bool>,
}

/// Maps an axis onto a command field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisMapping {
    pub field: Field,

    /// Index of the axis on the device
    pub axis: usize,

    /// If true the axis is inverted before scaling
    #[serde(default)]
    pub invert: bool,

    /// Magnitude around zero below which the axis reads as zero
    #[serde(default)]
    pub deadzone: f64,
}

/// Maps a button onto a command field. Pressed is the maximum of the field's range, released the
/// minimum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonMapping {
    pub field: Field,

    /// Index of the button on the device
    pub button: usize,
}

/// The full set of mappings, as loaded from parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputMapping {
    pub axes: Vec<AxisMapping>,
    pub buttons: Vec<ButtonMapping>,
}

/// Converts raw input into control commands.
#[derive(Debug, Clone)]
pub struct InputMapper {
    mapping: InputMapping,
    schema: CommandSchema,
}

/// A source which always reports an idle device, so the neutral command is sent.
#[derive(Debug, Default)]
pub struct NeutralSource;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// One reading from a [`CommandSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// The current input
    Input(RawInput),

    /// The source has nothing more to give, the sender should stop
    EndOfInput,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Could not open input device {0}: {1}")]
    OpenError(String, std::io::Error),

    #[error("Input device {0} disconnected")]
    Disconnected(String),

    #[error("Could not start the input reader thread: {0}")]
    ThreadError(std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("The {0} field is mapped more than once")]
    DuplicateField(Field),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for InputMapping {
    fn default() -> Self {
        let pedal = |field, axis| AxisMapping {
            field,
            axis,
            invert: true,
            deadzone: 0.0,
        };

        Self {
            axes: vec![
                AxisMapping {
                    field: Field::Steering,
                    axis: 0,
                    invert: false,
                    deadzone: 0.05,
                },
                pedal(Field::Throttle, 2),
                pedal(Field::Brake, 3),
                pedal(Field::Clutch, 1),
            ],
            buttons: vec![ButtonMapping {
                field: Field::Handbrake,
                button: 5,
            }],
        }
    }
}

impl InputMapper {
    pub fn new(mapping: InputMapping, schema: CommandSchema) -> Result<Self, MappingError> {
        let mut seen = HashSet::new();

        let fields = mapping
            .axes
            .iter()
            .map(|a| a.field)
            .chain(mapping.buttons.iter().map(|b| b.field));

        for field in fields {
            if !seen.insert(field) {
                return Err(MappingError::DuplicateField(field));
            }
        }

        Ok(Self { mapping, schema })
    }

    pub fn schema(&self) -> &CommandSchema {
        &self.schema
    }

    /// Map raw input onto a command, without a timestamp.
    pub fn map(&self, raw: &RawInput) -> ControlCommand {
        let mut cmd = self.schema.neutral();

        for a in self.mapping.axes.iter() {
            if let Some(value) = raw.axes.get(a.axis) {
                cmd.set(a.field, self.map_axis(a, *value));
            }
        }

        for b in self.mapping.buttons.iter() {
            if let Some(pressed) = raw.buttons.get(b.button) {
                let range = self.schema.range(b.field);
                cmd.set(b.field, if *pressed { range.max } else { range.min });
            }
        }

        cmd
    }

    fn map_axis(&self, mapping: &AxisMapping, value: f64) -> i32 {
        let range = self.schema.range(mapping.field);

        if !value.is_finite() {
            return self.schema.neutral().get(mapping.field);
        }

        let mut v = deadzone(clamp(&value, &-1.0, &1.0), mapping.deadzone);
        if mapping.invert {
            v = -v;
        }

        let scaled = lin_map((-1.0, 1.0), (range.min as f64, range.max as f64), v).round();

        range.clamp(scaled as i32)
    }
}

impl NeutralSource {
    pub fn new() -> Self {
        Self
    }
}

impl CommandSource for NeutralSource {
    fn poll(&mut self) -> Result<Sample, SourceError> {
        Ok(Sample::Input(RawInput::default()))
    }

    fn describe(&self) -> String {
        "neutral".into()
    }
}

impl<T: CommandSource + ?Sized> CommandSource for Box<T> {
    fn poll(&mut self) -> Result<Sample, SourceError> {
        (**self).poll()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn mapper() -> InputMapper {
        InputMapper::new(InputMapping::default(), CommandSchema::default()).unwrap()
    }

    fn input(axes: &[f64], buttons: &[bool]) -> RawInput {
        RawInput {
            axes: axes.to_vec(),
            buttons: buttons.to_vec(),
        }
    }

    #[test]
    fn test_steering() {
        let m = mapper();
        assert_eq!(m.map(&input(&[-1.0], &[])).steering, 0);
        assert_eq!(m.map(&input(&[0.0], &[])).steering, 90);
        assert_eq!(m.map(&input(&[1.0], &[])).steering, 180);

        // Inside the deadzone reads as centred
        assert_eq!(m.map(&input(&[0.04], &[])).steering, 90);
        assert_eq!(m.map(&input(&[-0.04], &[])).steering, 90);

        // Out of range and invalid axes are clamped or neutral
        assert_eq!(m.map(&input(&[3.0], &[])).steering, 180);
        assert_eq!(m.map(&input(&[f64::NAN], &[])).steering, 90);
    }

    #[test]
    fn test_pedals_and_buttons() {
        let m = mapper();

        let at_rest = m.map(&input(&[0.0, 1.0, 1.0, 1.0], &[false; 6]));
        assert_eq!(at_rest.throttle, 0);
        assert_eq!(at_rest.brake, 0);
        assert_eq!(at_rest.clutch, 0);
        assert_eq!(at_rest.handbrake, 0);

        let pressed = m.map(&input(&[0.0, -1.0, -1.0, 0.0], &[false, false, false, false, false, true]));
        assert_eq!(pressed.throttle, 100);
        assert_eq!(pressed.clutch, 100);
        assert_eq!(pressed.brake, 50);
        assert_eq!(pressed.handbrake, 1);
    }

    #[test]
    fn test_missing_inputs_are_neutral() {
        let m = mapper();
        let neutral = CommandSchema::default().neutral();

        assert_eq!(m.map(&RawInput::default()), neutral);
        assert_eq!(m.map(&input(&[0.5], &[])).throttle, neutral.throttle);
    }

    #[test]
    fn test_duplicate_field() {
        let mut mapping = InputMapping::default();
        mapping.buttons.push(ButtonMapping {
            field: Field::Steering,
            button: 0,
        });

        assert!(matches!(
            InputMapper::new(mapping, CommandSchema::default()),
            Err(MappingError::DuplicateField(Field::Steering))
        ));
    }

    #[test]
    fn test_neutral_source() {
        let mut source = NeutralSource::new();
        assert_eq!(source.poll().unwrap(), Sample::Input(RawInput::default()));
    }
}
