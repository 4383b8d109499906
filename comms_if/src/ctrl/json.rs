//! # JSON encoding
//!
//! Each record is a single line JSON object keyed by field name, optionally carrying the capture
//! time as milliseconds since the unix epoch under `"timestamp"`. The legacy key `"angle"` is
//! accepted in place of `"steering"`. Unknown keys are ignored.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{TimeZone, Utc};
use serde_json::{Map, Value};

use super::{CommandSchema, ControlCommand, DecodeError, Field};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Key holding the capture timestamp.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Alternative key accepted for the steering field.
pub const STEERING_ALIAS: &str = "angle";

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Encode the command. The command is assumed to already be clamped.
pub fn encode(cmd: &ControlCommand, schema: &CommandSchema) -> String {
    let mut doc = Map::new();

    for field in schema.field_order.iter() {
        doc.insert(field.name().into(), Value::from(cmd.get(*field)));
    }

    if let Some(ts) = cmd.timestamp {
        doc.insert(TIMESTAMP_KEY.into(), Value::from(ts.timestamp_millis()));
    }

    let mut record = Value::Object(doc).to_string();
    record.push('\n');
    record
}

/// Decode a trimmed record.
///
/// Every field in the schema's `field_order` must be present. Fields outside of the order are
/// used if present and otherwise take their neutral value.
pub fn decode(record: &str, schema: &CommandSchema) -> Result<ControlCommand, DecodeError> {
    let doc: Map<String, Value> =
        serde_json::from_str(record).map_err(|e| DecodeError::Json(e.to_string()))?;

    let mut cmd = schema.neutral();

    for field in Field::ALL.iter() {
        let value = match doc.get(field.name()) {
            Some(v) => Some(v),
            None if *field == Field::Steering => doc.get(STEERING_ALIAS),
            None => None,
        };

        match value {
            Some(v) => cmd.set(*field, schema.check(*field, integer(*field, v)?)?),
            None if schema.field_order.contains(field) => {
                return Err(DecodeError::MissingField(*field))
            }
            None => (),
        }
    }

    if let Some(ts) = doc.get(TIMESTAMP_KEY) {
        let ms = match ts.as_i64() {
            Some(ms) => ms,
            None => return Err(DecodeError::Json(format!("invalid timestamp {}", ts))),
        };
        cmd.timestamp = match Utc.timestamp_millis_opt(ms).single() {
            Some(t) => Some(t),
            None => return Err(DecodeError::InvalidTimestamp(ms)),
        };
    }

    Ok(cmd)
}

/// Extract an integer from a JSON value. Integers too large for `i64` are saturated so that the
/// range check rejects them.
fn integer(field: Field, value: &Value) -> Result<i64, DecodeError> {
    match value {
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => Ok(i),
            (None, Some(_)) => Ok(i64::MAX),
            (None, None) => Err(DecodeError::NotInteger(field, n.to_string())),
        },
        other => Err(DecodeError::NotInteger(field, other.to_string())),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode() {
        let schema = CommandSchema::default();
        let cmd = decode(
            r#"{"throttle":80,"steering":45,"brake":0,"clutch":0,"handbrake":1,"extra":"x"}"#,
            &schema,
        )
        .unwrap();

        assert_eq!(cmd.steering, 45);
        assert_eq!(cmd.throttle, 80);
        assert_eq!(cmd.handbrake, 1);
        assert_eq!(cmd.timestamp, None);
    }

    #[test]
    fn test_steering_only() {
        // The single field document sent by the original steering rig
        let schema = CommandSchema {
            field_order: vec![Field::Steering],
            ..Default::default()
        };

        let cmd = decode(r#"{"angle": 120}"#, &schema).unwrap();
        assert_eq!(cmd.steering, 120);
        assert_eq!(cmd.throttle, 0);

        assert_eq!(encode(&cmd, &schema), "{\"steering\":120}\n");
    }

    #[test]
    fn test_timestamp() {
        let schema = CommandSchema::default();
        let mut cmd = schema.neutral();
        cmd.timestamp = Some(Utc.timestamp_millis_opt(1_600_000_000_123).unwrap());

        let record = encode(&cmd, &schema);
        assert!(record.contains("\"timestamp\":1600000000123"));
        assert_eq!(decode(record.trim(), &schema), Ok(cmd));
    }

    #[test]
    fn test_rejects() {
        let schema = CommandSchema::default();

        assert_eq!(
            decode(r#"{"steering":45,"throttle":80,"brake":0,"clutch":0}"#, &schema),
            Err(DecodeError::MissingField(Field::Handbrake))
        );
        assert_eq!(
            decode(
                r#"{"steering":45.5,"throttle":80,"brake":0,"clutch":0,"handbrake":0}"#,
                &schema
            ),
            Err(DecodeError::NotInteger(Field::Steering, "45.5".into()))
        );
        assert_eq!(
            decode(
                r#"{"steering":"45","throttle":80,"brake":0,"clutch":0,"handbrake":0}"#,
                &schema
            ),
            Err(DecodeError::NotInteger(Field::Steering, "\"45\"".into()))
        );
        assert!(matches!(
            decode(
                r#"{"steering":45,"throttle":80,"brake":0,"clutch":0,"handbrake":2}"#,
                &schema
            ),
            Err(DecodeError::OutOfRange {
                field: Field::Handbrake,
                value: 2,
                ..
            })
        ));
        assert!(matches!(
            decode(
                r#"{"steering":18446744073709551615,"throttle":0,"brake":0,"clutch":0,"handbrake":0}"#,
                &schema
            ),
            Err(DecodeError::OutOfRange { .. })
        ));
        assert!(matches!(decode("[45, 80]", &schema), Err(DecodeError::Json(_))));
        assert!(matches!(decode("{\"steering\":", &schema), Err(DecodeError::Json(_))));
    }
}
