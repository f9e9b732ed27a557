//! Stream re-chunking: the sample block buffer, window precomputation,
//! the shared framing engine and the calculators built on it.

pub mod engine;
pub mod framer;
pub mod sample_buffer;
pub mod spectral;
pub mod window;

pub use engine::FramerConfig;
pub use framer::Framer;
pub use sample_buffer::SampleBlockBuffer;
pub use spectral::{SpectralFramer, SpectralFramerConfig, SpectralMagnitude};
pub use window::WindowKind;
