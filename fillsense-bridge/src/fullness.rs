//! Fullness normalization
//!
//! The sensor reports a distance: 20 units when the container is full, growing
//! as it empties. Anything above 600 is the sensor's "nothing in range" reading
//! and counts as empty.

use serde_json::Value;

use crate::error::ReadingError;
use crate::record::{kind_of, Record};

/// Field rewritten by the normalizer
pub const FULLNESS_FIELD: &str = "fullness";

/// Raw readings above this are treated as empty
pub const OUT_OF_RANGE_ABOVE: f64 = 600.0;

/// Raw reading of a full container
pub const FULL_READING: f64 = 20.0;

/// Raw distance covered by the linear scale
pub const SCALE_SPAN: f64 = 880.0;

/// Map a raw sensor reading to a fill percentage.
///
/// The sentinel check runs first; the upper clamp only matters for readings
/// closer than `FULL_READING`. There is no lower clamp: with the current
/// constants the linear branch never goes below zero.
pub fn normalize_fullness(raw: f64) -> f64 {
    if raw > OUT_OF_RANGE_ABOVE {
        return 0.0;
    }

    let percent = 100.0 - ((raw - FULL_READING) / SCALE_SPAN * 100.0);
    if percent > 100.0 {
        100.0
    } else {
        percent
    }
}

/// Replace the record's raw `fullness` with its percentage, leaving every other
/// field (and its position) untouched
pub fn normalize(mut record: Record) -> Result<Record, ReadingError> {
    let slot = record
        .get_mut(FULLNESS_FIELD)
        .ok_or(ReadingError::MissingFullness)?;

    let raw = match slot {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ReadingError::NotNumeric(n.to_string()))?,
        other => return Err(ReadingError::NotNumeric(kind_of(other).to_string())),
    };

    *slot = percent_value(normalize_fullness(raw));
    Ok(record)
}

fn percent_value(percent: f64) -> Value {
    // Finite by construction: any JSON number is finite and the mapping is linear.
    serde_json::Number::from_f64(percent)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
