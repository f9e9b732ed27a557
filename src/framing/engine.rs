//! Shared framing state machine.
//!
//! Both the raw framer and the spectral framer re-chunk a continuous
//! stream into fixed-length frames; the step quantization, timestamp
//! derivation and close-time padding live here so the two stay in
//! lockstep.

use ndarray::Array2;

use crate::error::StreamError;
use crate::framing::sample_buffer::SampleBlockBuffer;
use crate::framing::window::WindowKind;
use crate::stream::{Timestamp, units_for_samples};

/// Configuration shared by every framing calculator. Validated at open.
#[derive(Debug, Clone)]
pub struct FramerConfig {
    /// Output frame length in seconds, rounded to samples at open.
    pub frame_duration_seconds: f64,
    /// Overlap between consecutive frames in seconds. Must stay below the
    /// frame duration; negative values leave a gap of skipped samples
    /// between frames.
    pub frame_overlap_seconds: f64,
    /// Whether close() zero-pads and emits a trailing partial frame.
    /// When false, leftover partial-frame samples are dropped silently.
    pub pad_final_packet: bool,
    /// Derive timestamps from the most recent input timestamp instead of
    /// the cumulative sample count. Tolerates irregular or gapped input
    /// timing.
    pub use_local_timestamp: bool,
    /// Window applied to every output frame.
    pub window: WindowKind,
    /// Track a fractional average step exactly, letting individual steps
    /// vary by one sample, instead of rounding the step once at open.
    pub emulate_fractional_frame_overlap: bool,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            frame_duration_seconds: 0.025,
            frame_overlap_seconds: 0.0,
            pad_final_packet: true,
            use_local_timestamp: false,
            window: WindowKind::None,
            emulate_fractional_frame_overlap: false,
        }
    }
}

/// One completed frame, ready for emission or transformation.
pub(crate) struct CompletedFrame {
    pub samples: Array2<f32>,
    pub timestamp: Timestamp,
}

pub(crate) struct FrameEngine {
    sample_rate: f64,
    frame_duration_samples: usize,
    /// Samples between successive frame starts, as a real number. Integral
    /// unless fractional overlap emulation is on.
    average_frame_step: f64,
    window: Option<Vec<f32>>,
    use_local_timestamp: bool,
    pad_final_packet: bool,

    buffer: SampleBlockBuffer,
    cumulative_completed_samples: i64,
    cumulative_output_frames: i64,
    /// Samples to discard before the next frame's start: the previous
    /// frame's step, or a skip gap under negative overlap.
    samples_still_to_drop: usize,
    initial_input_timestamp: Option<Timestamp>,
    /// Timestamp of the last copied sample; drives local-timestamp mode.
    current_timestamp: Option<Timestamp>,
}

impl FrameEngine {
    pub fn open(
        config: &FramerConfig,
        sample_rate: f64,
        num_channels: usize,
    ) -> Result<Self, StreamError> {
        if !config.frame_duration_seconds.is_finite() || config.frame_duration_seconds <= 0.0 {
            return Err(StreamError::InvalidConfig(format!(
                "frame_duration_seconds must be positive, got {}",
                config.frame_duration_seconds
            )));
        }
        if !config.frame_overlap_seconds.is_finite()
            || config.frame_overlap_seconds >= config.frame_duration_seconds
        {
            return Err(StreamError::InvalidConfig(format!(
                "frame_overlap_seconds {} must be less than frame_duration_seconds {}",
                config.frame_overlap_seconds, config.frame_duration_seconds
            )));
        }

        let frame_duration_samples = (config.frame_duration_seconds * sample_rate).round() as i64;
        if frame_duration_samples < 1 {
            return Err(StreamError::InvalidConfig(format!(
                "frame duration of {}s rounds to zero samples at {}Hz",
                config.frame_duration_seconds, sample_rate
            )));
        }
        let frame_duration_samples = frame_duration_samples as usize;

        let average_frame_step = if config.emulate_fractional_frame_overlap {
            (config.frame_duration_seconds - config.frame_overlap_seconds) * sample_rate
        } else {
            frame_duration_samples as f64 - (config.frame_overlap_seconds * sample_rate).round()
        };
        if average_frame_step < 1.0 {
            return Err(StreamError::InvalidConfig(format!(
                "frame step of {average_frame_step} samples is too small to cover a single sample"
            )));
        }

        Ok(Self {
            sample_rate,
            frame_duration_samples,
            average_frame_step,
            window: config.window.coefficients(frame_duration_samples),
            use_local_timestamp: config.use_local_timestamp,
            pad_final_packet: config.pad_final_packet,
            buffer: SampleBlockBuffer::new(sample_rate, num_channels),
            cumulative_completed_samples: 0,
            cumulative_output_frames: 0,
            samples_still_to_drop: 0,
            initial_input_timestamp: None,
            current_timestamp: None,
        })
    }

    pub fn frame_duration_samples(&self) -> usize {
        self.frame_duration_samples
    }

    pub fn average_frame_step(&self) -> f64 {
        self.average_frame_step
    }

    /// Clears buffered samples and any pending drop, keeping counters and
    /// timestamp origins intact.
    pub fn reset_buffer(&mut self) {
        self.buffer.clear();
        self.samples_still_to_drop = 0;
    }

    /// Ingests one input block and returns every frame it completes.
    pub fn push(
        &mut self,
        samples: Array2<f32>,
        timestamp: Timestamp,
    ) -> Result<Vec<CompletedFrame>, StreamError> {
        if samples.nrows() != self.buffer.num_channels() {
            return Err(StreamError::ChannelMismatch {
                expected: self.buffer.num_channels(),
                actual: samples.nrows(),
            });
        }
        if self.initial_input_timestamp.is_none() {
            self.initial_input_timestamp = Some(timestamp);
            self.current_timestamp = Some(timestamp);
        }
        self.buffer.push(samples, timestamp);

        let mut completed = Vec::new();
        while self.buffer.len() >= self.frame_duration_samples + self.samples_still_to_drop {
            self.buffer.drop_samples(self.samples_still_to_drop);
            let (frame, last_timestamp) = self.buffer.copy_samples(self.frame_duration_samples);
            if let Some(ts) = last_timestamp {
                self.current_timestamp = Some(ts);
            }
            let step = self.next_frame_step();
            self.samples_still_to_drop = step;

            completed.push(CompletedFrame {
                samples: self.windowed(frame),
                timestamp: self.emission_timestamp(),
            });
            self.cumulative_output_frames += 1;
            self.cumulative_completed_samples += step as i64;
        }
        Ok(completed)
    }

    /// Close-time flush: drops the pending step remainder, then, when any
    /// samples remain and padding is enabled, zero-pads one final frame.
    /// Without padding, leftover partial-frame samples are dropped.
    pub fn flush(&mut self) -> Option<CompletedFrame> {
        self.buffer.drop_samples(self.samples_still_to_drop);
        self.samples_still_to_drop = 0;
        if self.buffer.is_empty() || !self.pad_final_packet {
            return None;
        }
        let (frame, last_timestamp) = self.buffer.copy_samples(self.frame_duration_samples);
        if let Some(ts) = last_timestamp {
            self.current_timestamp = Some(ts);
        }
        Some(CompletedFrame {
            samples: self.windowed(frame),
            timestamp: self.emission_timestamp(),
        })
    }

    /// Lower bound of the next emission, for the host's pipelining hint.
    /// Only meaningful in cumulative-timestamp mode.
    pub fn next_timestamp_bound(&self) -> Option<Timestamp> {
        if self.use_local_timestamp {
            return None;
        }
        self.initial_input_timestamp
            .map(|_| self.cumulative_timestamp())
    }

    /// Step from frame `k` to `k+1`: `round((k+1)*avg) - round(k*avg)`.
    /// Quantizing the cumulative position instead of the step keeps the
    /// rounding drift under half a sample, so the long-run average step
    /// converges to `average_frame_step` exactly.
    fn next_frame_step(&self) -> usize {
        let k = self.cumulative_output_frames as f64;
        let next = ((k + 1.0) * self.average_frame_step).round() as i64;
        let current = (k * self.average_frame_step).round() as i64;
        (next - current) as usize
    }

    fn emission_timestamp(&self) -> Timestamp {
        if self.use_local_timestamp {
            self.current_timestamp.unwrap_or(Timestamp(0))
        } else {
            self.cumulative_timestamp()
        }
    }

    /// Recomputed from the running sample count every time; accumulating
    /// per-frame increments would let round-off drift.
    fn cumulative_timestamp(&self) -> Timestamp {
        self.initial_input_timestamp
            .unwrap_or(Timestamp(0))
            .advanced_by(units_for_samples(
                self.cumulative_completed_samples,
                self.sample_rate,
            ))
    }

    fn windowed(&self, mut frame: Array2<f32>) -> Array2<f32> {
        if let Some(window) = &self.window {
            for mut row in frame.rows_mut() {
                for (sample, coefficient) in row.iter_mut().zip(window) {
                    *sample *= coefficient;
                }
            }
        }
        frame
    }
}
