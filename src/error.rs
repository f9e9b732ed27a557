//! Typed errors for calculator lifecycle calls.
//!
//! Every hard failure maps onto one variant; the host aborts the stream on
//! any of them. Soft diagnostics are logged with `tracing`, never returned.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// A required option is missing or an option value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The input stream header is missing or unusable.
    #[error("invalid stream header: {0}")]
    InvalidHeader(String),

    /// The resampling kernel could not be constructed at open time.
    #[error("resampler kernel construction failed: {0}")]
    KernelConstruction(String),

    /// A packet's row count does not match the stream's channel count.
    #[error("channel count mismatch: stream has {expected} channels, packet has {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    /// An emission would violate the strictly-increasing timestamp order.
    #[error("non-monotonic output timestamp: {current}us after {previous}us")]
    NonMonotonicTimestamp { previous: i64, current: i64 },

    /// A lifecycle call arrived outside the open streaming state.
    #[error("calculator `{0}` used outside its open streaming state")]
    NotOpened(&'static str),

    /// The registry has no factory under the requested name.
    #[error("no calculator registered under `{0}`")]
    UnknownCalculator(String),

    /// The resampling kernel reported a runtime failure.
    #[error("resampling failed: {0}")]
    Resample(String),
}
