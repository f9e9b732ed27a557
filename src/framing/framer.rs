//! Fixed-duration re-chunking of a continuous multichannel stream.

use tracing::debug;

use crate::calculator::{Calculator, OutputStream};
use crate::error::StreamError;
use crate::framing::engine::{FrameEngine, FramerConfig};
use crate::stream::{Packet, SidePackets, StreamHeader};

/// Re-chunks arbitrarily sized input packets into fixed-length,
/// optionally overlapping frames with sample-accurate timestamps.
///
/// Input packets accumulate in a rolling block buffer; whenever a whole
/// frame is available it is copied out, windowed and emitted. A process
/// call that completes no frame emits nothing.
pub struct Framer {
    config: FramerConfig,
    engine: Option<FrameEngine>,
}

impl Framer {
    pub fn new(config: FramerConfig) -> Self {
        Self {
            config,
            engine: None,
        }
    }
}

impl Calculator for Framer {
    fn name(&self) -> &'static str {
        "framer"
    }

    fn open(
        &mut self,
        header: &StreamHeader,
        _side: &SidePackets,
    ) -> Result<StreamHeader, StreamError> {
        header.validate()?;
        let engine = FrameEngine::open(&self.config, header.sample_rate, header.num_channels)?;
        debug!(
            frame_duration_samples = engine.frame_duration_samples(),
            average_frame_step = engine.average_frame_step(),
            "framer opened"
        );

        let mut out_header = header.clone();
        out_header.num_samples = Some(engine.frame_duration_samples());
        out_header.packet_rate = Some(header.sample_rate / engine.average_frame_step());
        self.engine = Some(engine);
        Ok(out_header)
    }

    fn process(&mut self, packet: Packet, out: &mut OutputStream) -> Result<(), StreamError> {
        let engine = self.engine.as_mut().ok_or(StreamError::NotOpened("framer"))?;
        for frame in engine.push(packet.samples, packet.timestamp)? {
            out.emit(frame.samples, frame.timestamp)?;
        }
        if let Some(bound) = engine.next_timestamp_bound() {
            out.set_next_timestamp_bound(bound);
        }
        Ok(())
    }

    fn close(&mut self, out: &mut OutputStream) -> Result<(), StreamError> {
        let mut engine = self.engine.take().ok_or(StreamError::NotOpened("framer"))?;
        if let Some(frame) = engine.flush() {
            out.emit(frame.samples, frame.timestamp)?;
        }
        Ok(())
    }
}
