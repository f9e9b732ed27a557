//! Stream-level data model: timestamps, headers, packets and side values.
//!
//! A stream is a sequence of timestamped matrices with stationary
//! properties described once by a [`StreamHeader`]. Rows are channels,
//! columns are samples; the channel count is fixed for the lifetime of a
//! stream while the column count varies packet to packet.

use std::collections::HashMap;
use std::fmt;

use ndarray::Array2;

use crate::error::StreamError;

/// Number of timestamp units per second (microsecond resolution).
pub const TIME_UNITS_PER_SECOND: i64 = 1_000_000;

/// A point on a stream's timeline, in microseconds.
///
/// Every packet carries the timestamp of its first sample. "Not yet
/// started" is `Option<Timestamp>`, never a sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_seconds(seconds: f64) -> Self {
        Self((seconds * TIME_UNITS_PER_SECOND as f64).round() as i64)
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    /// The timestamp `units` time units later.
    pub fn advanced_by(self, units: i64) -> Self {
        Self(self.0 + units)
    }

    /// The timestamp of the sample `samples` positions after this one.
    pub fn advanced_by_samples(self, samples: i64, sample_rate: f64) -> Self {
        self.advanced_by(units_for_samples(samples, sample_rate))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Timestamp units covered by `samples` samples at `sample_rate`, rounded
/// once at the end so round-off never accumulates.
pub fn units_for_samples(samples: i64, sample_rate: f64) -> i64 {
    (samples as f64 / sample_rate * TIME_UNITS_PER_SECOND as f64).round() as i64
}

/// Per-stream, set-once metadata describing stationary properties.
///
/// Set at open time and immutable thereafter; transform stages derive a
/// new header from their input header.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHeader {
    /// Samples per second per channel. Must be finite and positive.
    pub sample_rate: f64,
    /// Row count of every matrix on the stream.
    pub num_channels: usize,
    /// Column count, when every packet has the same length.
    pub num_samples: Option<usize>,
    /// Packets per second, when the output chunking rate is fixed.
    pub packet_rate: Option<f64>,
    /// Sample rate of the original waveform, carried through transform
    /// stages so downstream consumers can interpret frequency bins.
    pub audio_sample_rate: Option<f64>,
}

impl StreamHeader {
    pub fn new(sample_rate: f64, num_channels: usize) -> Self {
        Self {
            sample_rate,
            num_channels,
            num_samples: None,
            packet_rate: None,
            audio_sample_rate: None,
        }
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(StreamError::InvalidHeader(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

/// One timestamped unit of stream data: a dense matrix with rows =
/// channels and columns = samples, tagged with its first sample's timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub samples: Array2<f32>,
    pub timestamp: Timestamp,
}

impl Packet {
    pub fn new(samples: Array2<f32>, timestamp: Timestamp) -> Self {
        Self { samples, timestamp }
    }

    pub fn num_channels(&self) -> usize {
        self.samples.nrows()
    }

    pub fn num_samples(&self) -> usize {
        self.samples.ncols()
    }
}

/// A read-only scalar delivered by the host at or before open.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SideValue {
    Float(f64),
    Int(i64),
}

/// Named side values resolved once at open time. Optional inputs: a
/// calculator asking for an unconnected name simply gets `None`.
#[derive(Debug, Clone, Default)]
pub struct SidePackets {
    values: HashMap<String, SideValue>,
}

impl SidePackets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: SideValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(SideValue::Float(value)) => Some(*value),
            Some(SideValue::Int(value)) => Some(*value as f64),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_for_samples_rounds_once() {
        // 1 sample at 3 Hz is 333333.3..us; rounding happens at the end.
        assert_eq!(units_for_samples(1, 3.0), 333333);
        assert_eq!(units_for_samples(3, 3.0), 1_000_000);
        assert_eq!(units_for_samples(0, 48_000.0), 0);
    }

    #[test]
    fn test_timestamp_sample_advance() {
        let start = Timestamp::from_seconds(1.0);
        assert_eq!(start.advanced_by_samples(100, 20.0), Timestamp(6_000_000));
    }

    #[test]
    fn test_header_validation() {
        assert!(StreamHeader::new(44_100.0, 2).validate().is_ok());
        assert!(StreamHeader::new(0.0, 2).validate().is_err());
        assert!(StreamHeader::new(-8_000.0, 1).validate().is_err());
        assert!(StreamHeader::new(f64::NAN, 1).validate().is_err());
    }

    #[test]
    fn test_side_packet_lookup() {
        let mut side = SidePackets::new();
        side.insert("target_sample_rate", SideValue::Int(16_000));
        assert_eq!(side.get_f64("target_sample_rate"), Some(16_000.0));
        assert_eq!(side.get_f64("missing"), None);
    }
}
