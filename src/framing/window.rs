//! Analysis window selection and precomputation.

/// Window applied multiplicatively to every completed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowKind {
    /// No window: frames pass through unscaled.
    #[default]
    None,
    Hamming,
    Hann,
}

impl WindowKind {
    /// Precomputes the window coefficients, or `None` for the identity
    /// window so the per-frame multiply can be skipped entirely.
    pub fn coefficients(self, len: usize) -> Option<Vec<f32>> {
        match self {
            WindowKind::None => None,
            WindowKind::Hamming => Some(cosine_window(len, 0.54, 0.46)),
            WindowKind::Hann => Some(cosine_window(len, 0.5, 0.5)),
        }
    }
}

/// Generalized cosine window `a0 - a1*cos(2*pi*n/(N-1))`.
fn cosine_window(len: usize, a0: f32, a1: f32) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    let denominator = (len - 1) as f32;
    (0..len)
        .map(|n| a0 - a1 * (2.0 * std::f32::consts::PI * n as f32 / denominator).cos())
        .collect()
}
