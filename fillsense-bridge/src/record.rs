//! Line decoding for the sensor's serial output
//!
//! The firmware prints Python-style dicts (`{'fullness': 350, 'id': 'tank1'}`).
//! Each line is turned into JSON by swapping every apostrophe for a double
//! quote before parsing. This is a textual repair, not a parser: it breaks as
//! soon as a string value contains an apostrophe. If the firmware format can be
//! changed, emit real JSON instead and drop `repair_quotes`.
//!
//! Outgoing payloads keep the `", "` and `": "` separators that the existing
//! dashboards were fed (`{"fullness": 62.5, "id": "tank1"}`).

use std::io;

use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// A decoded reading: field name -> value, in device order
pub type Record = Map<String, Value>;

/// Replace every `'` with `"`
pub fn repair_quotes(line: &str) -> String {
    line.replace('\'', "\"")
}

/// Decode one raw serial line (with or without its line terminator)
pub fn decode_line(raw: &[u8]) -> Result<Record, DecodeError> {
    let text = std::str::from_utf8(raw)?.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    match serde_json::from_str::<Value>(&repair_quotes(text))? {
        Value::Object(record) => Ok(record),
        other => Err(DecodeError::NotAnObject(kind_of(&other))),
    }
}

/// Serialize a record as a telemetry payload
pub fn encode_record(record: &Record) -> Result<Vec<u8>, serde_json::Error> {
    let mut payload = Vec::with_capacity(128);
    let mut serializer = Serializer::with_formatter(&mut payload, SpacedFormatter);
    record.serialize(&mut serializer)?;
    Ok(payload)
}

/// Compact JSON with a space after each `,` and `:`
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
