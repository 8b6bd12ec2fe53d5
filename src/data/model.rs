use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

// ---------------------------------------------------------------------------
// WavelengthGrid – strictly increasing wavelength samples
// ---------------------------------------------------------------------------

/// An immutable, strictly increasing sequence of wavelengths (Å).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WavelengthGrid(Vec<f64>);

impl WavelengthGrid {
    /// Validate and wrap a wavelength axis.
    ///
    /// Fails with `InvalidParameter` if the axis is empty, contains a
    /// non-finite value, or is not strictly increasing.
    pub fn new(values: Vec<f64>) -> ModelResult<Self> {
        if values.is_empty() {
            return Err(ModelError::invalid("wavelengths", 0.0, "grid is empty"));
        }
        if let Some(&bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(ModelError::invalid("wavelengths", bad, "not finite"));
        }
        if let Some(pair) = values.windows(2).find(|w| w[1] <= w[0]) {
            return Err(ModelError::invalid(
                "wavelengths",
                pair[1],
                "grid must be strictly increasing",
            ));
        }
        Ok(WavelengthGrid(values))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn first(&self) -> f64 {
        self.0[0]
    }

    pub fn last(&self) -> f64 {
        self.0[self.0.len() - 1]
    }

    /// Arithmetic mean of all samples.
    pub fn mean(&self) -> f64 {
        self.0.iter().sum::<f64>() / self.0.len() as f64
    }

    /// Spacing between the first two samples, if there are two.
    pub fn leading_step(&self) -> Option<f64> {
        (self.0.len() >= 2).then(|| self.0[1] - self.0[0])
    }

    /// Index range of samples strictly inside `(lo, hi)`.
    pub fn index_range(&self, lo: f64, hi: f64) -> std::ops::Range<usize> {
        let start = self.0.partition_point(|&w| w <= lo);
        let end = self.0.partition_point(|&w| w < hi).max(start);
        start..end
    }
}

impl Deref for WavelengthGrid {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// FluxVector – flux samples aligned with a grid
// ---------------------------------------------------------------------------

/// Flux values aligned 1:1 with a [`WavelengthGrid`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FluxVector(Vec<f64>);

impl FluxVector {
    pub fn new(values: Vec<f64>) -> Self {
        FluxVector(values)
    }

    /// Divide every sample by the first one (continuum anchor).
    pub fn normalized_to_first(values: Vec<f64>) -> ModelResult<Self> {
        let anchor = values
            .first()
            .copied()
            .ok_or_else(|| ModelError::invalid("flux", 0.0, "flux vector is empty"))?;
        if anchor == 0.0 || !anchor.is_finite() {
            return Err(ModelError::invalid(
                "flux[0]",
                anchor,
                "continuum anchor must be finite and non-zero",
            ));
        }
        Ok(FluxVector(values.into_iter().map(|f| f / anchor).collect()))
    }

    /// Multiply every sample by `factor`.
    pub fn scaled(mut self, factor: f64) -> Self {
        self.0.iter_mut().for_each(|f| *f *= factor);
        self
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl Deref for FluxVector {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

impl From<Vec<f64>> for FluxVector {
    fn from(values: Vec<f64>) -> Self {
        FluxVector(values)
    }
}

// ---------------------------------------------------------------------------
// Observation – one echelle order
// ---------------------------------------------------------------------------

/// A normalized observed spectrum for a single order.
#[derive(Debug, Clone)]
pub struct Observation {
    pub grid: WavelengthGrid,
    pub flux: FluxVector,
}

impl Observation {
    /// Pair a grid with its flux, checking lengths agree.
    pub fn new(grid: WavelengthGrid, flux: FluxVector) -> ModelResult<Self> {
        if grid.len() != flux.len() {
            return Err(ModelError::ShapeMismatch {
                what: "observed flux",
                expected: grid.len(),
                found: flux.len(),
            });
        }
        Ok(Observation { grid, flux })
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.grid.len()
    }

    /// Whether the observation has no pixels.
    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }
}
