//! Explicit calculator registry.
//!
//! Factories are registered by explicit calls during startup, keyed by
//! name. There are no static-initializer side effects, so construction
//! order is deterministic and tests can build isolated registries.

use std::collections::HashMap;

use crate::error::StreamError;
use crate::framing::engine::FramerConfig;
use crate::framing::framer::Framer;
use crate::framing::spectral::{SpectralFramer, SpectralFramerConfig, SpectralMagnitude};
use crate::resample::{RationalResampler, ResamplerConfig};
use crate::transform::{DivideByMean, MatrixTransformCalculator, Transpose};

use super::Calculator;

pub type CalculatorFactory = Box<dyn Fn() -> Box<dyn Calculator> + Send + Sync>;

#[derive(Default)]
pub struct CalculatorRegistry {
    factories: HashMap<String, CalculatorFactory>,
}

impl CalculatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in calculator under its default
    /// configuration. Register a closure capturing your own config to
    /// override an entry.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("framer", || Box::new(Framer::new(FramerConfig::default())));
        registry.register("rational_resampler", || {
            Box::new(RationalResampler::new(ResamplerConfig::default()))
        });
        registry.register("spectral_framer", || {
            Box::new(SpectralFramer::new(
                SpectralFramerConfig::default(),
                Box::new(SpectralMagnitude::new()),
            ))
        });
        registry.register("transpose", || {
            Box::new(MatrixTransformCalculator::new("transpose", Box::new(Transpose)))
        });
        registry.register("divide_by_mean", || {
            Box::new(MatrixTransformCalculator::new(
                "divide_by_mean",
                Box::new(DivideByMean),
            ))
        });
        registry
    }

    /// Registers a factory, replacing any previous entry under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn Calculator> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Calculator>, StreamError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| StreamError::UnknownCalculator(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
