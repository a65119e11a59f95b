// Sensor records and pull-based record streams
//
// Each stream wraps an iterator of records that the data feed promises is
// sorted by timestamp. Records are validated as they are consumed; a bad
// record is surfaced, never skipped.

use std::fmt;
use std::iter::Peekable;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FilterError;

/// The three input streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Position,
    Speed,
    Steering,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [StreamKind::Position, StreamKind::Speed, StreamKind::Steering];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Position => "position",
            StreamKind::Speed => "speed",
            StreamKind::Steering => "steering",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "position" => Ok(StreamKind::Position),
            "speed" => Ok(StreamKind::Speed),
            "steering" => Ok(StreamKind::Steering),
            other => Err(FilterError::invalid("stream", format!("unknown stream '{}'", other))),
        }
    }
}

/// Absolute position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Seconds
    pub timestamp: f64,
    /// Meters
    pub x: f64,
    /// Meters
    pub y: f64,
    /// Reported accuracy in millimetres
    pub accuracy: f64,
}

/// Wheel-speed measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    pub timestamp: f64,
    /// Meters per second
    pub speed: f64,
}

/// Steering-angle measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SteeringSample {
    pub timestamp: f64,
    /// Degrees; converted to radians before use
    pub angle: f64,
}

/// A record from any of the three streams
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorEvent {
    Position(PositionFix),
    Speed(SpeedSample),
    Steering(SteeringSample),
}

impl SensorEvent {
    pub fn timestamp(&self) -> f64 {
        match self {
            SensorEvent::Position(r) => r.timestamp,
            SensorEvent::Speed(r) => r.timestamp,
            SensorEvent::Steering(r) => r.timestamp,
        }
    }

    pub fn kind(&self) -> StreamKind {
        match self {
            SensorEvent::Position(_) => StreamKind::Position,
            SensorEvent::Speed(_) => StreamKind::Speed,
            SensorEvent::Steering(_) => StreamKind::Steering,
        }
    }
}

/// A typed record belonging to one stream
pub trait SensorRecord: Copy {
    const KIND: StreamKind;

    fn timestamp(&self) -> f64;

    /// Named value fields, checked for finiteness on consumption
    fn fields(&self) -> Vec<(&'static str, f64)>;

    fn into_event(self) -> SensorEvent;

    /// Record-specific range checks, run after the finiteness check
    fn check_range(&self) -> Result<(), String> {
        Ok(())
    }

    fn validate(&self) -> Result<(), FilterError> {
        for (name, value) in self.fields() {
            if !value.is_finite() {
                return Err(FilterError::malformed(
                    Self::KIND,
                    format!("field {} is not finite ({})", name, value),
                ));
            }
        }
        self.check_range().map_err(|reason| FilterError::malformed(Self::KIND, reason))
    }
}

impl SensorRecord for PositionFix {
    const KIND: StreamKind = StreamKind::Position;

    fn timestamp(&self) -> f64 {
        self.timestamp
    }

    fn fields(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("timestamp", self.timestamp),
            ("x", self.x),
            ("y", self.y),
            ("accuracy", self.accuracy),
        ]
    }

    fn into_event(self) -> SensorEvent {
        SensorEvent::Position(self)
    }

    fn check_range(&self) -> Result<(), String> {
        if self.accuracy < 0.0 {
            return Err(format!("negative accuracy {}", self.accuracy));
        }
        Ok(())
    }
}

impl SensorRecord for SpeedSample {
    const KIND: StreamKind = StreamKind::Speed;

    fn timestamp(&self) -> f64 {
        self.timestamp
    }

    fn fields(&self) -> Vec<(&'static str, f64)> {
        vec![("timestamp", self.timestamp), ("speed", self.speed)]
    }

    fn into_event(self) -> SensorEvent {
        SensorEvent::Speed(self)
    }
}

impl SensorRecord for SteeringSample {
    const KIND: StreamKind = StreamKind::Steering;

    fn timestamp(&self) -> f64 {
        self.timestamp
    }

    fn fields(&self) -> Vec<(&'static str, f64)> {
        vec![("timestamp", self.timestamp), ("angle", self.angle)]
    }

    fn into_event(self) -> SensorEvent {
        SensorEvent::Steering(self)
    }
}

/// Read cursor over one timestamp-ordered record sequence
pub struct SensorStream<I>
where
    I: Iterator,
{
    records: Peekable<I>,
    last_timestamp: Option<f64>,
}

impl<I> SensorStream<I>
where
    I: Iterator,
    I::Item: SensorRecord,
{
    pub fn new<T>(records: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            records: records.into_iter().peekable(),
            last_timestamp: None,
        }
    }

    pub fn kind(&self) -> StreamKind {
        <I::Item as SensorRecord>::KIND
    }

    pub fn peek(&mut self) -> Option<&I::Item> {
        self.records.peek()
    }

    /// Timestamp of the next unread record, if any
    pub fn peek_timestamp(&mut self) -> Option<f64> {
        self.records.peek().map(|r| r.timestamp())
    }

    /// Take the next record, validating its fields and its ordering
    /// against the previous record of this stream.
    pub fn consume(&mut self) -> Option<Result<I::Item, FilterError>> {
        let record = self.records.next()?;

        if let Err(e) = record.validate() {
            return Some(Err(e));
        }
        let timestamp = record.timestamp();
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                return Some(Err(FilterError::malformed(
                    self.kind(),
                    format!("timestamp {} precedes previous record at {}", timestamp, last),
                )));
            }
        }
        self.last_timestamp = Some(timestamp);
        Some(Ok(record))
    }
}
