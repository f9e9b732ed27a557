//! The calculator lifecycle contract and the output side of it.
//!
//! The host graph runtime owns packet routing, scheduling and lifecycle
//! ordering; a [`Calculator`] only sees `open` → `process`* → `close`,
//! invoked strictly sequentially for any one instance. Nothing here
//! spawns threads, blocks or performs I/O.

pub mod registry;

use ndarray::Array2;

use crate::error::StreamError;
use crate::stream::{Packet, SidePackets, StreamHeader, Timestamp};

/// A stream-processing component driven by the host graph runtime.
///
/// Instances are single-use per stream: there is no transition back from
/// closed, and `process` calls arrive in increasing-timestamp order.
pub trait Calculator: Send {
    /// Name the calculator registers under.
    fn name(&self) -> &'static str;

    /// Validates configuration against the input header and returns the
    /// derived output header. Any error here fails the stream before data
    /// flows.
    fn open(
        &mut self,
        header: &StreamHeader,
        side: &SidePackets,
    ) -> Result<StreamHeader, StreamError>;

    /// Consumes one input packet, emitting zero or more output packets.
    fn process(&mut self, packet: Packet, out: &mut OutputStream) -> Result<(), StreamError>;

    /// Flushes any buffered state. This is the only flush point; an
    /// aborted graph never sees partial-frame output.
    fn close(&mut self, out: &mut OutputStream) -> Result<(), StreamError>;
}

/// Collects a calculator's emissions and enforces the stream ordering
/// contract: timestamps strictly increase and empty packets are never
/// emitted.
#[derive(Debug, Default)]
pub struct OutputStream {
    packets: Vec<Packet>,
    last_timestamp: Option<Timestamp>,
    next_timestamp_bound: Option<Timestamp>,
}

impl OutputStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits a matrix at the timestamp of its first sample. A matrix with
    /// zero columns is dropped silently: short inputs that complete no
    /// output must not occupy a timestamp.
    pub fn emit(&mut self, samples: Array2<f32>, timestamp: Timestamp) -> Result<(), StreamError> {
        if samples.ncols() == 0 {
            return Ok(());
        }
        if let Some(previous) = self.last_timestamp {
            if timestamp <= previous {
                return Err(StreamError::NonMonotonicTimestamp {
                    previous: previous.as_micros(),
                    current: timestamp.as_micros(),
                });
            }
        }
        self.last_timestamp = Some(timestamp);
        self.packets.push(Packet::new(samples, timestamp));
        Ok(())
    }

    /// Advertises the lower bound of the next emission so the host can
    /// pipeline downstream work. Purely a performance hint.
    pub fn set_next_timestamp_bound(&mut self, bound: Timestamp) {
        self.next_timestamp_bound = Some(bound);
    }

    pub fn next_timestamp_bound(&self) -> Option<Timestamp> {
        self.next_timestamp_bound
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Drains everything emitted so far.
    pub fn take_packets(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.packets)
    }
}

/// Drives one complete stream through a calculator: open, every packet in
/// arrival order, then close. Returns the output header and all emissions.
pub fn run_stream(
    calculator: &mut dyn Calculator,
    header: &StreamHeader,
    side: &SidePackets,
    packets: Vec<Packet>,
) -> Result<(StreamHeader, Vec<Packet>), StreamError> {
    let out_header = calculator.open(header, side)?;
    let mut out = OutputStream::new();
    for packet in packets {
        calculator.process(packet, &mut out)?;
    }
    calculator.close(&mut out)?;
    Ok((out_header, out.take_packets()))
}
