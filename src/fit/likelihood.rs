use serde::{Deserialize, Serialize};

use crate::data::library::SpectralLibrary;
use crate::data::model::Observation;
use crate::error::{ModelError, ModelResult};
use crate::fit::params::ParameterVector;
use crate::synth::forward::ForwardModel;

/// Default per-pixel noise (normalized flux units).
pub const DEFAULT_SIGMA: f64 = 0.02;

// ---------------------------------------------------------------------------
// Noise model
// ---------------------------------------------------------------------------

/// Per-pixel flux uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseModel {
    /// One sigma for every pixel.
    Constant(f64),
    /// One sigma per pixel, aligned with the observation.
    PerPixel(Vec<f64>),
}

impl Default for NoiseModel {
    fn default() -> Self {
        NoiseModel::Constant(DEFAULT_SIGMA)
    }
}

impl NoiseModel {
    /// Check positivity and, for per-pixel noise, length against `pixels`.
    pub fn validate(&self, pixels: usize) -> ModelResult<()> {
        let sigmas: &[f64] = match self {
            NoiseModel::Constant(s) => std::slice::from_ref(s),
            NoiseModel::PerPixel(v) => {
                if v.len() != pixels {
                    return Err(ModelError::ShapeMismatch {
                        what: "noise vector",
                        expected: pixels,
                        found: v.len(),
                    });
                }
                v
            }
        };
        match sigmas.iter().find(|s| !(**s > 0.0 && s.is_finite())) {
            Some(&bad) => Err(ModelError::invalid("sigma", bad, "must be > 0")),
            None => Ok(()),
        }
    }

    fn sigma(&self, pixel: usize) -> f64 {
        match self {
            NoiseModel::Constant(s) => *s,
            NoiseModel::PerPixel(v) => v[pixel],
        }
    }
}

/// `Σ ((observed − model) / σ)²` over all pixels.
pub fn chi_square(observed: &[f64], model: &[f64], noise: &NoiseModel) -> ModelResult<f64> {
    if observed.len() != model.len() {
        return Err(ModelError::ShapeMismatch {
            what: "model flux",
            expected: observed.len(),
            found: model.len(),
        });
    }
    noise.validate(observed.len())?;
    Ok(observed
        .iter()
        .zip(model)
        .enumerate()
        .map(|(i, (o, m))| ((o - m) / noise.sigma(i)).powi(2))
        .sum())
}

// ---------------------------------------------------------------------------
// Target – what the sampler evaluates
// ---------------------------------------------------------------------------

/// A chi-square surface over parameter space.
pub trait Target {
    fn chi_square(&self, params: &ParameterVector) -> ModelResult<f64>;
}

/// Chi-square of one observation against the forward model.
pub struct Likelihood<'a, L> {
    model: ForwardModel<'a, L>,
    observation: &'a Observation,
    noise: NoiseModel,
}

impl<'a, L: SpectralLibrary> Likelihood<'a, L> {
    pub fn new(
        model: ForwardModel<'a, L>,
        observation: &'a Observation,
        noise: NoiseModel,
    ) -> ModelResult<Self> {
        noise.validate(observation.len())?;
        Ok(Self {
            model,
            observation,
            noise,
        })
    }
}

impl<L: SpectralLibrary> Target for Likelihood<'_, L> {
    fn chi_square(&self, params: &ParameterVector) -> ModelResult<f64> {
        let synthetic = self.model.synthesize(params, &self.observation.grid)?;
        chi_square(&self.observation.flux, &synthetic, &self.noise)
    }
}
