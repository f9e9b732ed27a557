//! Streaming rational-factor sample rate conversion.
//!
//! Wraps a windowed-sinc kernel ([`rubato::SincFixedIn`]) behind the
//! packetized lifecycle: arbitrary-size input chunks in, resampled chunks
//! out, with output timestamps derived from cumulative sample counts so
//! they stay independent of the kernel's internal latency.

use ndarray::Array2;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{debug, warn};

use crate::calculator::{Calculator, OutputStream};
use crate::error::StreamError;
use crate::stream::{
    Packet, SidePackets, StreamHeader, TIME_UNITS_PER_SECOND, Timestamp, units_for_samples,
};

/// Largest denominator used when quantizing the rate ratio to a rational.
/// Covers the common audio rates (8k/16k/22.05k/32k/44.1k/48k) exactly.
const MAX_DENOMINATOR: u64 = 2000;

/// Permitted relative error of the quantized rate ratio (0.025%).
const MAX_RATIO_ERROR: f64 = 0.000_25;

/// Input frames fed to the kernel per call.
const KERNEL_CHUNK_SIZE: usize = 1024;

/// Flush rounds after which draining gives up; the kernel latency is far
/// below one chunk, so this is never reached in practice.
const MAX_FLUSH_ROUNDS: usize = 8;

/// Side packet consulted when the configuration leaves the target rate
/// unset.
pub const TARGET_SAMPLE_RATE_SIDE_PACKET: &str = "target_sample_rate";

#[derive(Debug, Clone)]
pub struct ResamplerConfig {
    /// Output sample rate. Required here or via the
    /// [`TARGET_SAMPLE_RATE_SIDE_PACKET`] side value.
    pub target_sample_rate: Option<f64>,
    /// Length of the sinc filter, in samples.
    pub sinc_len: usize,
    /// Anti-alias cutoff as a proportion of the lower Nyquist rate.
    pub cutoff_proportion: f32,
    /// Legacy radius/cutoff parameterization, converted at open when set.
    pub legacy_filter: Option<LegacyFilterParams>,
    /// Warn when input timestamps drift from the cumulative sample count.
    pub check_inconsistent_timestamps: bool,
}

/// Filter parameterization carried over from older configurations.
#[derive(Debug, Clone, Copy)]
pub struct LegacyFilterParams {
    /// Filter radius in source samples.
    pub radius: f64,
    /// Anti-alias cutoff frequency in Hz.
    pub cutoff_hz: f64,
}

impl Default for ResamplerConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: None,
            sinc_len: 128,
            cutoff_proportion: 0.95,
            legacy_filter: None,
            check_inconsistent_timestamps: true,
        }
    }
}

/// Changes a stream's sample rate while preserving sample-accurate
/// timing. When source and target rates are equal no kernel is
/// constructed and input passes through verbatim.
pub struct RationalResampler {
    config: ResamplerConfig,
    state: Option<OpenState>,
}

struct OpenState {
    source_rate: f64,
    target_rate: f64,
    /// Quantized target/source ratio as a rational.
    ratio_numerator: u64,
    ratio_denominator: u64,
    /// `None` in pass-through mode.
    kernel: Option<KernelState>,
    num_channels: usize,
    cumulative_input_samples: i64,
    cumulative_output_samples: i64,
    initial_timestamp: Option<Timestamp>,
    check_inconsistent_timestamps: bool,
}

struct KernelState {
    kernel: SincFixedIn<f32>,
    /// Per-channel input staging until a whole kernel chunk is available.
    pending: Vec<Vec<f32>>,
    /// Initial kernel latency still to be trimmed from the output, so
    /// emitted sample 0 corresponds to input sample 0.
    delay_remaining: usize,
}

impl RationalResampler {
    pub fn new(config: ResamplerConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    fn filter_parameters(
        &self,
        source_rate: f64,
        target_rate: f64,
    ) -> Result<SincInterpolationParameters, StreamError> {
        let (sinc_len, f_cutoff) = match self.config.legacy_filter {
            Some(legacy) => {
                // Unit conversions from the legacy radius/cutoff form.
                let radius_factor = legacy.radius * (target_rate / source_rate).min(1.0);
                let sinc_len = (2.0 * radius_factor).ceil().max(2.0) as usize;
                let cutoff = (2.0 * legacy.cutoff_hz / source_rate.min(target_rate)) as f32;
                (sinc_len.next_multiple_of(2), cutoff)
            }
            None => (self.config.sinc_len, self.config.cutoff_proportion),
        };
        if sinc_len == 0 || !(f_cutoff > 0.0 && f_cutoff <= 1.0) {
            return Err(StreamError::KernelConstruction(format!(
                "invalid filter parameters: sinc_len={sinc_len}, cutoff={f_cutoff}"
            )));
        }
        Ok(SincInterpolationParameters {
            sinc_len,
            f_cutoff,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        })
    }

    /// Shared by process and close; close passes an empty input with
    /// `flush` set to drain the kernel.
    fn process_internal(
        state: &mut OpenState,
        input: &Array2<f32>,
        input_timestamp: Option<Timestamp>,
        flush: bool,
        out: &mut OutputStream,
    ) -> Result<(), StreamError> {
        if let Some(timestamp) = input_timestamp {
            if state.initial_timestamp.is_none() {
                state.initial_timestamp = Some(timestamp);
            } else if state.check_inconsistent_timestamps {
                state.warn_on_drift(timestamp);
            }
        }
        let Some(initial) = state.initial_timestamp else {
            return Ok(());
        };

        let output_timestamp = initial.advanced_by(units_for_samples(
            state.cumulative_output_samples,
            state.target_rate,
        ));

        state.cumulative_input_samples += input.ncols() as i64;
        let flush_target = state.expected_total_output() - state.cumulative_output_samples;

        let output = match &mut state.kernel {
            None => input.clone(),
            Some(kernel) => {
                let mut produced = kernel.ingest(input, state.num_channels)?;
                if flush {
                    kernel.drain(&mut produced, flush_target)?;
                }
                rows_to_matrix(state.num_channels, produced)
            }
        };

        state.cumulative_output_samples += output.ncols() as i64;
        out.emit(output, output_timestamp)
    }

    fn close_internal(
        state: &mut OpenState,
        out: &mut OutputStream,
    ) -> Result<(), StreamError> {
        if state.initial_timestamp.is_none() {
            // The stream never started: nothing buffered, nothing to flush.
            return Ok(());
        }
        let empty = Array2::zeros((state.num_channels, 0));
        Self::process_internal(state, &empty, None, true, out)
    }
}

impl OpenState {
    /// Total output samples the rational ratio owes for the input so far.
    fn expected_total_output(&self) -> i64 {
        (self.cumulative_input_samples as f64 * self.ratio_numerator as f64
            / self.ratio_denominator as f64)
            .round() as i64
    }

    /// Soft diagnostic: upstream timing no longer matches the sample
    /// count. Never fails the stream.
    fn warn_on_drift(&self, timestamp: Timestamp) {
        let Some(initial) = self.initial_timestamp else {
            return;
        };
        let expected = initial.advanced_by(units_for_samples(
            self.cumulative_input_samples,
            self.source_rate,
        ));
        let half_sample_units = TIME_UNITS_PER_SECOND as f64 / self.source_rate / 2.0;
        let drift = (timestamp.as_micros() - expected.as_micros()).abs() as f64;
        if drift > half_sample_units {
            warn!(
                expected = expected.as_micros(),
                actual = timestamp.as_micros(),
                "input timestamp deviates from cumulative sample count"
            );
        }
    }
}

impl KernelState {
    /// Stages the input and runs every whole chunk through the kernel,
    /// returning per-channel output rows with initial latency trimmed.
    fn ingest(
        &mut self,
        input: &Array2<f32>,
        num_channels: usize,
    ) -> Result<Vec<Vec<f32>>, StreamError> {
        for (channel, row) in input.rows().into_iter().enumerate() {
            self.pending[channel].extend(row.iter());
        }
        let mut produced: Vec<Vec<f32>> = vec![Vec::new(); num_channels];
        while self.pending[0].len() >= KERNEL_CHUNK_SIZE {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..KERNEL_CHUNK_SIZE).collect())
                .collect();
            let out_chunk = self
                .kernel
                .process(&chunk, None)
                .map_err(|e| StreamError::Resample(e.to_string()))?;
            self.append_trimmed(&mut produced, out_chunk);
        }
        Ok(produced)
    }

    /// Feeds the staged remainder, then silence, until `needed` more
    /// samples exist; anything past that point is ringing from the zero
    /// padding and is cut off.
    fn drain(&mut self, produced: &mut [Vec<f32>], needed: i64) -> Result<(), StreamError> {
        if !self.pending[0].is_empty() {
            let chunk: Vec<Vec<f32>> = self.pending.iter_mut().map(std::mem::take).collect();
            let out_chunk = self
                .kernel
                .process_partial(Some(&chunk), None)
                .map_err(|e| StreamError::Resample(e.to_string()))?;
            self.append_trimmed(produced, out_chunk);
        }
        let mut rounds = 0;
        while (produced[0].len() as i64) < needed && rounds < MAX_FLUSH_ROUNDS {
            let out_chunk = self
                .kernel
                .process_partial::<Vec<f32>>(None, None)
                .map_err(|e| StreamError::Resample(e.to_string()))?;
            if out_chunk.first().map_or(0, Vec::len) == 0 {
                break;
            }
            self.append_trimmed(produced, out_chunk);
            rounds += 1;
        }
        let keep = needed.max(0) as usize;
        for row in produced.iter_mut() {
            row.truncate(keep);
        }
        Ok(())
    }

    fn append_trimmed(&mut self, produced: &mut [Vec<f32>], chunk: Vec<Vec<f32>>) {
        let frames = chunk.first().map_or(0, Vec::len);
        let skip = self.delay_remaining.min(frames);
        self.delay_remaining -= skip;
        for (row, channel) in produced.iter_mut().zip(chunk) {
            row.extend(&channel[skip..]);
        }
    }
}

/// Reassembles per-channel rows into a channels x samples matrix.
fn rows_to_matrix(num_channels: usize, rows: Vec<Vec<f32>>) -> Array2<f32> {
    let cols = rows.first().map_or(0, Vec::len);
    let mut matrix = Array2::zeros((num_channels, cols));
    for (r, row) in rows.iter().enumerate() {
        for (c, &value) in row.iter().enumerate() {
            matrix[[r, c]] = value;
        }
    }
    matrix
}

/// Best rational approximation `p/q` of `ratio` with `q <=
/// max_denominator`, found by walking the continued-fraction convergents
/// and checking the final semiconvergent.
fn rational_approximation(ratio: f64, max_denominator: u64) -> (u64, u64) {
    let (mut p0, mut q0, mut p1, mut q1) = (0u64, 1u64, 1u64, 0u64);
    let mut x = ratio;
    for _ in 0..64 {
        let floor = x.floor();
        if !(0.0..=u64::MAX as f64).contains(&floor) {
            break;
        }
        let a = floor as u64;
        let p2 = a.saturating_mul(p1).saturating_add(p0);
        let q2 = a.saturating_mul(q1).saturating_add(q0);
        if q2 > max_denominator {
            let t = (max_denominator - q0) / q1.max(1);
            let (ps, qs) = (p0 + t * p1, q0 + t * q1);
            let error = |p: u64, q: u64| (p as f64 / q as f64 - ratio).abs();
            if qs > 0 && error(ps, qs) < error(p1.max(1), q1.max(1)) {
                return (ps, qs);
            }
            break;
        }
        p0 = p1;
        q0 = q1;
        p1 = p2;
        q1 = q2;
        let fraction = x - floor;
        if fraction < 1e-12 {
            break;
        }
        x = 1.0 / fraction;
    }
    (p1.max(1), q1.max(1))
}

impl Calculator for RationalResampler {
    fn name(&self) -> &'static str {
        "rational_resampler"
    }

    fn open(
        &mut self,
        header: &StreamHeader,
        side: &SidePackets,
    ) -> Result<StreamHeader, StreamError> {
        header.validate()?;
        if header.num_channels == 0 {
            return Err(StreamError::InvalidHeader(
                "resampler needs at least one channel".to_string(),
            ));
        }
        let target_rate = self
            .config
            .target_sample_rate
            .or_else(|| side.get_f64(TARGET_SAMPLE_RATE_SIDE_PACKET))
            .ok_or_else(|| {
                StreamError::InvalidConfig("target_sample_rate is required".to_string())
            })?;
        if !target_rate.is_finite() || target_rate <= 0.0 {
            return Err(StreamError::InvalidConfig(format!(
                "target_sample_rate must be positive, got {target_rate}"
            )));
        }
        let source_rate = header.sample_rate;

        let (ratio_numerator, ratio_denominator, kernel) = if target_rate == source_rate {
            debug!(rate = source_rate, "resampler in pass-through mode");
            (1, 1, None)
        } else {
            let ratio = target_rate / source_rate;
            let (numerator, denominator) = rational_approximation(ratio, MAX_DENOMINATOR);
            let quantized = numerator as f64 / denominator as f64;
            let relative_error = (quantized - ratio).abs() / ratio;
            if relative_error > MAX_RATIO_ERROR {
                return Err(StreamError::KernelConstruction(format!(
                    "rate ratio {source_rate}->{target_rate} is not representable within \
                     {:.3}% (closest rational {numerator}/{denominator})",
                    MAX_RATIO_ERROR * 100.0
                )));
            }
            let parameters = self.filter_parameters(source_rate, target_rate)?;
            let kernel = SincFixedIn::<f32>::new(
                quantized,
                1.0,
                parameters,
                KERNEL_CHUNK_SIZE,
                header.num_channels,
            )
            .map_err(|e| StreamError::KernelConstruction(e.to_string()))?;
            let delay_remaining = kernel.output_delay();
            debug!(
                numerator,
                denominator, delay_remaining, "resampler kernel constructed"
            );
            (
                numerator,
                denominator,
                Some(KernelState {
                    kernel,
                    pending: vec![Vec::new(); header.num_channels],
                    delay_remaining,
                }),
            )
        };

        self.state = Some(OpenState {
            source_rate,
            target_rate,
            ratio_numerator,
            ratio_denominator,
            kernel,
            num_channels: header.num_channels,
            cumulative_input_samples: 0,
            cumulative_output_samples: 0,
            initial_timestamp: None,
            check_inconsistent_timestamps: self.config.check_inconsistent_timestamps,
        });

        // Output packet sizes follow the kernel, so no fixed chunking can
        // be promised downstream.
        let mut out_header = header.clone();
        out_header.sample_rate = target_rate;
        out_header.num_samples = None;
        out_header.packet_rate = None;
        Ok(out_header)
    }

    fn process(&mut self, packet: Packet, out: &mut OutputStream) -> Result<(), StreamError> {
        let state = self
            .state
            .as_mut()
            .ok_or(StreamError::NotOpened("rational_resampler"))?;
        if packet.num_channels() != state.num_channels {
            return Err(StreamError::ChannelMismatch {
                expected: state.num_channels,
                actual: packet.num_channels(),
            });
        }
        Self::process_internal(state, &packet.samples, Some(packet.timestamp), false, out)
    }

    fn close(&mut self, out: &mut OutputStream) -> Result<(), StreamError> {
        let mut state = self
            .state
            .take()
            .ok_or(StreamError::NotOpened("rational_resampler"))?;
        Self::close_internal(&mut state, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::run_stream;

    fn sine_packet(channels: usize, samples: usize, phase0: usize, timestamp: Timestamp) -> Packet {
        let matrix = Array2::from_shape_fn((channels, samples), |(ch, col)| {
            let t = (phase0 + col) as f32;
            ((t * 0.05) + ch as f32).sin()
        });
        Packet::new(matrix, timestamp)
    }

    fn config(target: f64) -> ResamplerConfig {
        ResamplerConfig {
            target_sample_rate: Some(target),
            ..ResamplerConfig::default()
        }
    }

    #[test]
    fn test_rational_approximation_of_common_rates() {
        assert_eq!(rational_approximation(48_000.0 / 44_100.0, 2000), (160, 147));
        assert_eq!(rational_approximation(44_100.0 / 22_050.0, 2000), (2, 1));
        assert_eq!(rational_approximation(8_000.0 / 16_000.0, 2000), (1, 2));
        assert_eq!(rational_approximation(22_050.0 / 32_000.0, 2000), (441, 640));

        // An irrational ratio lands within the acceptance bound.
        let (p, q) = rational_approximation(std::f64::consts::PI, 2000);
        let relative = (p as f64 / q as f64 - std::f64::consts::PI).abs() / std::f64::consts::PI;
        assert!(relative < MAX_RATIO_ERROR);
    }

    #[test]
    fn test_legacy_filter_conversion() {
        let mut legacy_config = config(16_000.0);
        legacy_config.legacy_filter = Some(LegacyFilterParams {
            radius: 6.0,
            cutoff_hz: 7_000.0,
        });
        let resampler = RationalResampler::new(legacy_config);
        let parameters = resampler.filter_parameters(32_000.0, 16_000.0).unwrap();
        // radius scales with min(1, target/source); cutoff is a proportion
        // of the lower Nyquist rate.
        assert_eq!(parameters.sinc_len, 6);
        assert!((parameters.f_cutoff - 0.875).abs() < 1e-6);

        // A cutoff beyond the lower Nyquist rate cannot be built.
        let mut bad_config = config(16_000.0);
        bad_config.legacy_filter = Some(LegacyFilterParams {
            radius: 6.0,
            cutoff_hz: 20_000.0,
        });
        let resampler = RationalResampler::new(bad_config);
        let err = resampler.filter_parameters(32_000.0, 16_000.0).unwrap_err();
        assert!(matches!(err, StreamError::KernelConstruction(_)));
    }

    #[test]
    fn test_pass_through_is_bit_identical() {
        let header = StreamHeader::new(48_000.0, 2);
        let inputs = vec![
            sine_packet(2, 480, 0, Timestamp(0)),
            sine_packet(2, 480, 480, Timestamp(10_000)),
        ];

        let mut resampler = RationalResampler::new(config(48_000.0));
        let out_header = resampler.open(&header, &SidePackets::new()).unwrap();
        assert_eq!(out_header.sample_rate, 48_000.0);
        assert!(resampler.state.as_ref().unwrap().kernel.is_none());

        let mut out = OutputStream::new();
        for packet in &inputs {
            resampler.process(packet.clone(), &mut out).unwrap();
        }
        resampler.close(&mut out).unwrap();

        let output = out.take_packets();
        assert_eq!(output, inputs);
    }

    #[test]
    fn test_missing_target_rate_fails_open() {
        let header = StreamHeader::new(48_000.0, 1);
        let mut resampler = RationalResampler::new(ResamplerConfig::default());
        let err = resampler.open(&header, &SidePackets::new()).unwrap_err();
        assert!(matches!(err, StreamError::InvalidConfig(_)));
    }

    #[test]
    fn test_target_rate_from_side_packet() {
        use crate::stream::SideValue;

        let header = StreamHeader::new(48_000.0, 1);
        let mut side = SidePackets::new();
        side.insert(TARGET_SAMPLE_RATE_SIDE_PACKET, SideValue::Float(16_000.0));

        let mut resampler = RationalResampler::new(ResamplerConfig::default());
        let out_header = resampler.open(&header, &side).unwrap();
        assert_eq!(out_header.sample_rate, 16_000.0);
        assert_eq!(out_header.num_samples, None);
        assert_eq!(out_header.packet_rate, None);
    }

    #[test]
    fn test_close_without_process_is_a_noop() {
        let header = StreamHeader::new(48_000.0, 1);
        let mut resampler = RationalResampler::new(config(16_000.0));
        resampler.open(&header, &SidePackets::new()).unwrap();

        let mut out = OutputStream::new();
        resampler.close(&mut out).unwrap();
        assert!(out.packets().is_empty());
    }

    #[test]
    fn test_downsample_total_output_matches_ratio() {
        let header = StreamHeader::new(32_000.0, 1);
        let mut resampler = RationalResampler::new(config(16_000.0));

        let total_input = 8_000usize;
        let chunk = 500usize;
        let inputs: Vec<Packet> = (0..total_input / chunk)
            .map(|i| {
                sine_packet(
                    1,
                    chunk,
                    i * chunk,
                    Timestamp(units_for_samples((i * chunk) as i64, 32_000.0)),
                )
            })
            .collect();

        let (_, output) =
            run_stream(&mut resampler, &header, &SidePackets::new(), inputs).unwrap();

        let total_output: usize = output.iter().map(|p| p.samples.ncols()).sum();
        let expected = total_input / 2;
        assert!(
            (total_output as i64 - expected as i64).abs() <= 11,
            "total output {total_output} too far from expected {expected}"
        );

        // First emission starts at the stream origin; timestamps increase.
        assert_eq!(output[0].timestamp, Timestamp(0));
        for pair in output.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[test]
    fn test_upsample_total_output_matches_ratio() {
        let header = StreamHeader::new(8_000.0, 2);
        let mut resampler = RationalResampler::new(config(16_000.0));

        let inputs: Vec<Packet> = (0..5)
            .map(|i| {
                sine_packet(
                    2,
                    800,
                    i * 800,
                    Timestamp(units_for_samples((i * 800) as i64, 8_000.0)),
                )
            })
            .collect();

        let (_, output) =
            run_stream(&mut resampler, &header, &SidePackets::new(), inputs).unwrap();

        let total_output: usize = output.iter().map(|p| p.samples.ncols()).sum();
        assert!(
            (total_output as i64 - 8_000).abs() <= 11,
            "total output {total_output} too far from expected 8000"
        );
        assert!(output.iter().all(|p| p.samples.nrows() == 2));
    }

    #[test]
    fn test_output_timestamps_follow_cumulative_count() {
        let header = StreamHeader::new(16_000.0, 1);
        let mut resampler = RationalResampler::new(config(8_000.0));
        resampler.open(&header, &SidePackets::new()).unwrap();

        let mut out = OutputStream::new();
        let base = Timestamp::from_seconds(2.0);
        for i in 0..4 {
            let packet = sine_packet(
                1,
                2048,
                i * 2048,
                base.advanced_by(units_for_samples((i * 2048) as i64, 16_000.0)),
            );
            resampler.process(packet, &mut out).unwrap();
        }
        resampler.close(&mut out).unwrap();

        let output = out.take_packets();
        assert!(!output.is_empty());
        assert_eq!(output[0].timestamp, base);
        // Each packet's timestamp equals the origin advanced by the output
        // samples emitted before it.
        let mut emitted = 0i64;
        for packet in &output {
            assert_eq!(
                packet.timestamp,
                base.advanced_by(units_for_samples(emitted, 8_000.0))
            );
            emitted += packet.samples.ncols() as i64;
        }
    }

    #[test]
    fn test_channel_mismatch_fails() {
        let header = StreamHeader::new(48_000.0, 2);
        let mut resampler = RationalResampler::new(config(24_000.0));
        resampler.open(&header, &SidePackets::new()).unwrap();

        let mut out = OutputStream::new();
        let err = resampler
            .process(sine_packet(1, 64, 0, Timestamp(0)), &mut out)
            .unwrap_err();
        assert!(matches!(err, StreamError::ChannelMismatch { .. }));
    }
}
