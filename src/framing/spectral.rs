//! Frame-synchronous transforms.
//!
//! [`SpectralFramer`] frames the stream exactly like [`Framer`](crate::framing::framer::Framer)
//! but emits the result of a per-frame transform instead of the raw
//! frame, at the timestamp the raw frame would have carried.

use std::sync::Arc;

use ndarray::Array2;
use rustfft::{Fft, FftPlanner, num_complex::Complex};
use tracing::debug;

use crate::calculator::{Calculator, OutputStream};
use crate::error::StreamError;
use crate::framing::engine::{FrameEngine, FramerConfig};
use crate::stream::{Packet, SidePackets, StreamHeader};
use crate::transform::MatrixTransform;

/// Configuration for [`SpectralFramer`].
#[derive(Debug, Clone, Default)]
pub struct SpectralFramerConfig {
    pub framing: FramerConfig,
    /// Start every process call with an empty sample buffer instead of
    /// persisting partial frames across calls.
    pub reset_buffer_every_call: bool,
}

/// Framing state machine that applies an injected transform to each
/// completed frame.
pub struct SpectralFramer {
    config: SpectralFramerConfig,
    transform: Box<dyn MatrixTransform>,
    engine: Option<FrameEngine>,
}

impl SpectralFramer {
    pub fn new(config: SpectralFramerConfig, transform: Box<dyn MatrixTransform>) -> Self {
        Self {
            config,
            transform,
            engine: None,
        }
    }
}

impl Calculator for SpectralFramer {
    fn name(&self) -> &'static str {
        "spectral_framer"
    }

    fn open(
        &mut self,
        header: &StreamHeader,
        _side: &SidePackets,
    ) -> Result<StreamHeader, StreamError> {
        header.validate()?;
        let engine = FrameEngine::open(&self.config.framing, header.sample_rate, header.num_channels)?;
        debug!(
            frame_duration_samples = engine.frame_duration_samples(),
            reset_buffer_every_call = self.config.reset_buffer_every_call,
            "spectral framer opened"
        );

        let mut frame_header = header.clone();
        frame_header.num_samples = Some(engine.frame_duration_samples());
        let mut out_header = self.transform.mutate_header(&frame_header)?;
        // Output packets arrive at the frame rate; the original waveform
        // rate is carried for frequency-bin interpretation downstream.
        out_header.sample_rate = header.sample_rate / engine.average_frame_step();
        out_header.packet_rate = Some(out_header.sample_rate);
        out_header.audio_sample_rate = Some(header.sample_rate);

        self.engine = Some(engine);
        Ok(out_header)
    }

    fn process(&mut self, packet: Packet, out: &mut OutputStream) -> Result<(), StreamError> {
        let engine = self
            .engine
            .as_mut()
            .ok_or(StreamError::NotOpened("spectral_framer"))?;
        if self.config.reset_buffer_every_call {
            engine.reset_buffer();
        }
        for frame in engine.push(packet.samples, packet.timestamp)? {
            out.emit(self.transform.apply(&frame.samples)?, frame.timestamp)?;
        }
        if let Some(bound) = engine.next_timestamp_bound() {
            out.set_next_timestamp_bound(bound);
        }
        Ok(())
    }

    fn close(&mut self, out: &mut OutputStream) -> Result<(), StreamError> {
        let mut engine = self
            .engine
            .take()
            .ok_or(StreamError::NotOpened("spectral_framer"))?;
        if let Some(frame) = engine.flush() {
            out.emit(self.transform.apply(&frame.samples)?, frame.timestamp)?;
        }
        Ok(())
    }
}

/// Magnitude spectrum of each frame, zero-padded to the next power of
/// two. Multichannel frames are averaged to mono before the transform;
/// output rows are frequency bins, one column per frame.
pub struct SpectralMagnitude {
    fft: Option<Arc<dyn Fft<f32>>>,
    fft_len: usize,
}

impl SpectralMagnitude {
    pub fn new() -> Self {
        Self {
            fft: None,
            fft_len: 0,
        }
    }

    fn num_bins(&self) -> usize {
        self.fft_len / 2 + 1
    }
}

impl Default for SpectralMagnitude {
    fn default() -> Self {
        Self::new()
    }
}

impl MatrixTransform for SpectralMagnitude {
    fn mutate_header(&mut self, header: &StreamHeader) -> Result<StreamHeader, StreamError> {
        let frame_len = header.num_samples.ok_or_else(|| {
            StreamError::InvalidHeader("spectral transform needs a fixed frame length".to_string())
        })?;
        if header.num_channels == 0 || frame_len == 0 {
            return Err(StreamError::InvalidHeader(
                "spectral transform needs at least one channel and one sample".to_string(),
            ));
        }
        self.fft_len = frame_len.next_power_of_two();
        self.fft = Some(FftPlanner::new().plan_fft_forward(self.fft_len));

        let mut out = header.clone();
        out.num_channels = self.num_bins();
        out.num_samples = Some(1);
        Ok(out)
    }

    fn apply(&mut self, input: &Array2<f32>) -> Result<Array2<f32>, StreamError> {
        let fft = self
            .fft
            .as_ref()
            .ok_or(StreamError::NotOpened("spectral_magnitude"))?;

        let channels = input.nrows() as f32;
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.fft_len];
        for (col, column) in input.columns().into_iter().take(self.fft_len).enumerate() {
            buffer[col].re = column.sum() / channels;
        }
        fft.process(&mut buffer);

        let mut out = Array2::zeros((self.num_bins(), 1));
        for (bin, value) in buffer.iter().take(self.num_bins()).enumerate() {
            out[[bin, 0]] = value.norm();
        }
        Ok(out)
    }
}
