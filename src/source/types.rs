//! Reading types for the sensor-stream boundary.
//!
//! A transport frame is a single comma-separated line: an epoch-millisecond
//! timestamp followed by a fixed number of channel values. Anything that does
//! not parse into exactly that shape is dropped upstream and counted, never
//! forwarded.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A single posture-sensor reading. Immutable once parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    /// Timestamp when the reading was taken
    pub timestamp: DateTime<Utc>,
    /// Channel values (pressure cells), fixed width per stream
    pub channels: Vec<f64>,
}

impl SensorReading {
    pub fn new(timestamp: DateTime<Utc>, channels: Vec<f64>) -> Self {
        Self {
            timestamp,
            channels,
        }
    }

    /// Parse a raw transport frame into a reading with exactly
    /// `channel_count` channels.
    pub fn parse(frame: &str, channel_count: usize) -> Result<Self, ParseError> {
        let frame = frame.trim();
        if frame.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut fields = frame.split(',');

        let ts_field = fields.next().ok_or(ParseError::Empty)?;
        let ts_ms: i64 = ts_field
            .trim()
            .parse()
            .map_err(|_| ParseError::BadTimestamp(ts_field.trim().to_string()))?;
        let timestamp = Utc
            .timestamp_millis_opt(ts_ms)
            .single()
            .ok_or(ParseError::BadTimestamp(ts_field.trim().to_string()))?;

        let mut channels = Vec::with_capacity(channel_count);
        for (index, field) in fields.enumerate() {
            let value: f64 = field
                .trim()
                .parse()
                .map_err(|_| ParseError::BadChannel { index })?;
            if !value.is_finite() {
                return Err(ParseError::BadChannel { index });
            }
            channels.push(value);
        }

        if channels.len() != channel_count {
            return Err(ParseError::WrongArity {
                expected: channel_count,
                got: channels.len(),
            });
        }

        Ok(Self {
            timestamp,
            channels,
        })
    }
}

/// A malformed frame. Dropped and counted by the source adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty frame")]
    Empty,
    #[error("invalid timestamp field '{0}'")]
    BadTimestamp(String),
    #[error("invalid channel value at index {index}")]
    BadChannel { index: usize },
    #[error("expected {expected} channels, got {got}")]
    WrongArity { expected: usize, got: usize },
}
