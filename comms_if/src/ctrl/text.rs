//! # Delimited text encoding
//!
//! Each record is the schema's fields, in `field_order`, written as comma separated integers and
//! terminated by a newline. The timestamp is not carried.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use super::{CommandSchema, ControlCommand, DecodeError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Separator between fields.
pub const SEPARATOR: &str = ",";

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Encode the command. The command is assumed to already be clamped.
pub fn encode(cmd: &ControlCommand, schema: &CommandSchema) -> String {
    let mut record = schema
        .field_order
        .iter()
        .map(|f| cmd.get(*f).to_string())
        .collect::<Vec<_>>()
        .join(SEPARATOR);
    record.push('\n');
    record
}

/// Decode a trimmed record.
pub fn decode(record: &str, schema: &CommandSchema) -> Result<ControlCommand, DecodeError> {
    let values: Vec<&str> = record.split(SEPARATOR).map(str::trim).collect();

    if values.len() != schema.field_order.len() {
        return Err(DecodeError::FieldCount {
            expected: schema.field_order.len(),
            found: values.len(),
        });
    }

    let mut cmd = schema.neutral();

    for (field, value) in schema.field_order.iter().zip(values) {
        if value.is_empty() {
            return Err(DecodeError::MissingField(*field));
        }

        let value: i64 = value
            .parse()
            .map_err(|_| DecodeError::NotInteger(*field, value.to_string()))?;

        cmd.set(*field, schema.check(*field, value)?);
    }

    Ok(cmd)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
