//! Per-packet matrix transforms.
//!
//! One calculator engine parameterized by a [`MatrixTransform`] strategy
//! replaces per-transform subclassing: the strategy derives the output
//! header once at open and maps each matrix thereafter, with timestamps
//! passed through unchanged.

use ndarray::Array2;

use crate::calculator::{Calculator, OutputStream};
use crate::error::StreamError;
use crate::stream::{Packet, SidePackets, StreamHeader};

/// A stateless-per-packet mapping from one matrix to another, plus the
/// header derivation that describes the mapped stream.
pub trait MatrixTransform: Send {
    /// Derives the output stream header from the input header.
    fn mutate_header(&mut self, header: &StreamHeader) -> Result<StreamHeader, StreamError>;

    /// Transforms one matrix.
    fn apply(&mut self, input: &Array2<f32>) -> Result<Array2<f32>, StreamError>;
}

/// Applies a [`MatrixTransform`] to every packet, one output per input.
pub struct MatrixTransformCalculator {
    name: &'static str,
    transform: Box<dyn MatrixTransform>,
    channels: Option<usize>,
}

impl MatrixTransformCalculator {
    pub fn new(name: &'static str, transform: Box<dyn MatrixTransform>) -> Self {
        Self {
            name,
            transform,
            channels: None,
        }
    }
}

impl Calculator for MatrixTransformCalculator {
    fn name(&self) -> &'static str {
        self.name
    }

    fn open(
        &mut self,
        header: &StreamHeader,
        _side: &SidePackets,
    ) -> Result<StreamHeader, StreamError> {
        header.validate()?;
        self.channels = Some(header.num_channels);
        self.transform.mutate_header(header)
    }

    fn process(&mut self, packet: Packet, out: &mut OutputStream) -> Result<(), StreamError> {
        let expected = self.channels.ok_or(StreamError::NotOpened(self.name))?;
        if packet.num_channels() != expected {
            return Err(StreamError::ChannelMismatch {
                expected,
                actual: packet.num_channels(),
            });
        }
        out.emit(self.transform.apply(&packet.samples)?, packet.timestamp)
    }

    fn close(&mut self, _out: &mut OutputStream) -> Result<(), StreamError> {
        if self.channels.is_none() {
            return Err(StreamError::NotOpened(self.name));
        }
        Ok(())
    }
}

/// Swaps rows and columns, e.g. turning a single-row summary vector into
/// a column whose entries become the output stream's channels.
pub struct Transpose;

impl MatrixTransform for Transpose {
    fn mutate_header(&mut self, header: &StreamHeader) -> Result<StreamHeader, StreamError> {
        let num_samples = header.num_samples.ok_or_else(|| {
            StreamError::InvalidHeader("transpose needs a fixed packet length".to_string())
        })?;
        let mut out = header.clone();
        out.num_channels = num_samples;
        out.num_samples = Some(header.num_channels);
        Ok(out)
    }

    fn apply(&mut self, input: &Array2<f32>) -> Result<Array2<f32>, StreamError> {
        Ok(input.t().to_owned())
    }
}

/// Normalizes a matrix by its global mean. A mean of exactly zero yields
/// an all-ones matrix rather than a division by zero.
pub struct DivideByMean;

impl MatrixTransform for DivideByMean {
    fn mutate_header(&mut self, header: &StreamHeader) -> Result<StreamHeader, StreamError> {
        Ok(header.clone())
    }

    fn apply(&mut self, input: &Array2<f32>) -> Result<Array2<f32>, StreamError> {
        let mean = input.mean().unwrap_or(0.0);
        if mean == 0.0 {
            return Ok(Array2::ones(input.dim()));
        }
        Ok(input / mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    use crate::calculator::run_stream;
    use crate::stream::Timestamp;

    #[test]
    fn test_transpose_summary_vector() {
        let mut header = StreamHeader::new(100.0, 1);
        header.num_samples = Some(3);

        let mut calculator = MatrixTransformCalculator::new("transpose", Box::new(Transpose));
        let input = Packet::new(array![[3.0, -9.0, 4.0]], Timestamp(0));
        let (out_header, output) = run_stream(
            &mut calculator,
            &header,
            &SidePackets::new(),
            vec![input],
        )
        .unwrap();

        assert_eq!(out_header.num_channels, 3);
        assert_eq!(out_header.num_samples, Some(1));
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].samples, array![[3.0], [-9.0], [4.0]]);
        assert_eq!(output[0].timestamp, Timestamp(0));
    }

    #[test]
    fn test_transpose_requires_fixed_length() {
        let header = StreamHeader::new(100.0, 1);
        let mut calculator = MatrixTransformCalculator::new("transpose", Box::new(Transpose));
        assert!(calculator.open(&header, &SidePackets::new()).is_err());
    }

    #[test]
    fn test_divide_by_mean_guards_zero_mean() {
        let mut transform = DivideByMean;
        // Rows sum to zero: the mean is exactly 0.
        let input = array![[1.0, -1.0], [2.0, -2.0]];
        let output = transform.apply(&input).unwrap();
        assert_eq!(output, Array2::ones((2, 2)));
    }

    #[test]
    fn test_divide_by_mean_normalizes() {
        let mut transform = DivideByMean;
        let input = array![[2.0, 4.0], [6.0, 8.0]];
        let output = transform.apply(&input).unwrap();
        assert_eq!(output, array![[0.4, 0.8], [1.2, 1.6]]);
    }

    #[test]
    fn test_channel_mismatch_fails_the_stream() {
        let header = StreamHeader::new(100.0, 2);
        let mut calculator =
            MatrixTransformCalculator::new("divide_by_mean", Box::new(DivideByMean));
        calculator.open(&header, &SidePackets::new()).unwrap();

        let mut out = OutputStream::new();
        let packet = Packet::new(Array2::ones((3, 4)), Timestamp(0));
        let err = calculator.process(packet, &mut out).unwrap_err();
        assert!(matches!(err, StreamError::ChannelMismatch { .. }));
    }
}
