use thiserror::Error;

/// Result alias for the numerical core (kernels, shifts, resampling, sampling).
pub type ModelResult<T> = Result<T, ModelError>;

/// Failures raised by the forward-model pipeline and the sampler.
///
/// Every variant is raised at the point of detection and propagated
/// unchanged; nothing in the pipeline substitutes a default value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Malformed numeric input: non-positive width or step, superluminal
    /// velocity, non-monotonic grid, degenerate normalization anchor.
    #[error("invalid parameter `{name}` = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// No library spectrum within the discretization tolerance.
    #[error("no library spectrum for T = {temperature} K, log g = {surface_gravity}")]
    LibraryMiss {
        temperature: f64,
        surface_gravity: f64,
    },

    /// A resampling bin edge falls outside the model wavelength span.
    #[error("bin edge {edge} outside model span [{min}, {max}]")]
    OutOfRange { edge: f64, min: f64, max: f64 },

    /// Two vectors that must be aligned have different lengths.
    #[error("{what}: expected {expected} values, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

impl ModelError {
    pub(crate) fn invalid(name: &'static str, value: f64, reason: &'static str) -> Self {
        ModelError::InvalidParameter {
            name,
            value,
            reason,
        }
    }
}
