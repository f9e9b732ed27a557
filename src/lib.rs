//! Time-series framing and resampling calculators for a host-driven
//! dataflow graph.
//!
//! The host runtime owns packet routing, scheduling and lifecycle
//! ordering; the calculators here own the sample and timestamp
//! bookkeeping:
//!
//! - [`Framer`] re-chunks a continuous multichannel stream into
//!   fixed-length, optionally overlapping frames.
//! - [`RationalResampler`] changes a stream's sample rate while keeping
//!   timing sample-accurate.
//! - [`SpectralFramer`] frames identically to [`Framer`] and applies a
//!   per-frame transform (e.g. [`SpectralMagnitude`]) before emitting.
//! - [`MatrixTransformCalculator`] runs per-packet matrix transforms
//!   such as [`Transpose`] and [`DivideByMean`].
//!
//! Calculators are constructed directly or looked up by name through
//! [`CalculatorRegistry`]; [`run_stream`] drives one full
//! open → process* → close cycle.

pub mod calculator;
pub mod error;
pub mod framing;
pub mod resample;
pub mod stream;
pub mod transform;

pub use calculator::registry::CalculatorRegistry;
pub use calculator::{Calculator, OutputStream, run_stream};
pub use error::StreamError;
pub use framing::{
    Framer, FramerConfig, SampleBlockBuffer, SpectralFramer, SpectralFramerConfig,
    SpectralMagnitude, WindowKind,
};
pub use resample::{LegacyFilterParams, RationalResampler, ResamplerConfig};
pub use stream::{
    Packet, SidePackets, SideValue, StreamHeader, TIME_UNITS_PER_SECOND, Timestamp,
};
pub use transform::{DivideByMean, MatrixTransform, MatrixTransformCalculator, Transpose};
