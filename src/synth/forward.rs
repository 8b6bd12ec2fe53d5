use log::{trace, warn};
use serde::{Deserialize, Serialize};

use crate::data::library::{FluxProvider, SpectralLibrary};
use crate::data::model::{FluxVector, WavelengthGrid};
use crate::error::{ModelError, ModelResult};
use crate::fit::params::ParameterVector;
use crate::synth::doppler;
use crate::synth::kernel::{
    instrument_kernel, rotational_kernel, DEFAULT_INSTRUMENT_FWHM, DEFAULT_LIMB_DARKENING,
    DEFAULT_ROTATION_STEP,
};
use crate::synth::resample;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Fixed (non-sampled) knobs of the forward model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Sampling step of the rotational kernel (Å).
    pub rotation_step: f64,
    /// Linear limb-darkening coefficient.
    pub limb_darkening: f64,
    /// Instrumental FWHM (km/s).
    pub instrument_fwhm_kms: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            rotation_step: DEFAULT_ROTATION_STEP,
            limb_darkening: DEFAULT_LIMB_DARKENING,
            instrument_fwhm_kms: DEFAULT_INSTRUMENT_FWHM,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

/// Output of a convolution stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadened {
    pub flux: Vec<f64>,
    /// Samples at each end that zero padding pulled toward zero.
    pub drained: usize,
}

/// Convolve `flux` with the rotational profile for `v_rot` at `center`.
pub fn broaden_rotation(
    flux: &[f64],
    center: f64,
    v_rot: f64,
    settings: &ModelSettings,
) -> ModelResult<Broadened> {
    let kernel = rotational_kernel(center, v_rot, settings.rotation_step, settings.limb_darkening)?;
    Ok(Broadened {
        flux: kernel.convolve(flux),
        drained: kernel.len() / 2,
    })
}

/// Doppler-shift a rest-frame grid.
pub fn shift_grid(grid: &WavelengthGrid, vz: f64) -> ModelResult<WavelengthGrid> {
    WavelengthGrid::new(doppler::shift(grid, vz)?)
}

/// Convolve `flux` with the instrumental profile sampled at the leading
/// spacing of `grid` and centered at its mean.
pub fn broaden_instrument(
    flux: &[f64],
    grid: &WavelengthGrid,
    settings: &ModelSettings,
) -> ModelResult<Broadened> {
    let spacing = grid.leading_step().ok_or_else(|| {
        ModelError::invalid(
            "model_wavelengths",
            grid.len() as f64,
            "at least two samples are needed for the instrument kernel",
        )
    })?;
    let kernel = instrument_kernel(spacing, settings.instrument_fwhm_kms, grid.mean())?;
    Ok(Broadened {
        flux: kernel.convolve(flux),
        drained: kernel.len() / 2,
    })
}

/// Fail unless every bin of `observed` lies on samples of `grid` that are
/// untouched by the `drained` edge samples of the convolutions.
pub fn check_coverage(
    grid: &WavelengthGrid,
    drained: usize,
    observed: &WavelengthGrid,
) -> ModelResult<()> {
    let edges = resample::bin_edges(observed)?;
    let (lo_edge, hi_edge) = (edges[0], edges[edges.len() - 1]);
    let n = grid.len();
    if n <= 2 * drained {
        return Err(ModelError::OutOfRange {
            edge: lo_edge,
            min: grid.first(),
            max: grid.last(),
        });
    }
    let (min, max) = (grid[drained], grid[n - 1 - drained]);
    for edge in [lo_edge, hi_edge] {
        if !(edge >= min && edge <= max) {
            return Err(ModelError::OutOfRange { edge, min, max });
        }
    }
    Ok(())
}

/// Library spacing when it differs from the rotational kernel step.
///
/// The rotational kernel is applied one weight per library sample, so any
/// mismatch rescales the broadening width by `spacing / rotation_step`.
pub fn rotation_step_mismatch(grid: &WavelengthGrid, settings: &ModelSettings) -> Option<f64> {
    let spacing = grid.leading_step()?;
    ((spacing - settings.rotation_step).abs() > 1e-6 * settings.rotation_step).then_some(spacing)
}

// ---------------------------------------------------------------------------
// ForwardModel
// ---------------------------------------------------------------------------

/// Synthesizes observed-frame spectra from library flux.
///
/// Holds no state of its own beyond a borrowed [`FluxProvider`]; output is a
/// pure function of the parameters, the grids and the provider's contents.
pub struct ForwardModel<'a, L> {
    provider: &'a FluxProvider<L>,
    settings: ModelSettings,
}

impl<'a, L: SpectralLibrary> ForwardModel<'a, L> {
    pub fn new(provider: &'a FluxProvider<L>, settings: ModelSettings) -> Self {
        if let Some(spacing) = rotation_step_mismatch(provider.grid(), &settings) {
            warn!(
                "library spacing {spacing:.6} Å differs from rotation_step {:.6} Å; \
                 rotational broadening will be scaled by {:.3}",
                settings.rotation_step,
                spacing / settings.rotation_step
            );
        }
        Self { provider, settings }
    }

    /// Model flux for `params` averaged over the pixels of `observed_grid`.
    pub fn synthesize(
        &self,
        params: &ParameterVector,
        observed_grid: &WavelengthGrid,
    ) -> ModelResult<FluxVector> {
        let flux = self
            .provider
            .get_flux(params.temperature, params.surface_gravity)?;

        let rotated = broaden_rotation(
            &flux,
            observed_grid.mean(),
            params.rotational_velocity,
            &self.settings,
        )?;
        let shifted = shift_grid(self.provider.grid(), params.radial_velocity)?;
        let instrumental = broaden_instrument(&rotated.flux, &shifted, &self.settings)?;
        check_coverage(&shifted, rotated.drained + instrumental.drained, observed_grid)?;
        let binned = resample::rebin(&shifted, &instrumental.flux, observed_grid)?;

        trace!("synthesized {} pixels for {params}", binned.len());
        Ok(binned.scaled(params.flux_prefactor))
    }
}
