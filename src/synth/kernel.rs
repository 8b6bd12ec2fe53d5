use std::f64::consts::PI;

use crate::error::{ModelError, ModelResult};
use crate::synth::{C_ANG_S, C_KM_S, KM_S_TO_ANG_S};

/// Default sampling step of the rotational kernel (Å).
pub const DEFAULT_ROTATION_STEP: f64 = 0.01;

/// Default linear limb-darkening coefficient.
pub const DEFAULT_LIMB_DARKENING: f64 = 0.6;

/// Default instrumental FWHM (km/s).
pub const DEFAULT_INSTRUMENT_FWHM: f64 = 6.8;

/// Gaussian FWHM / sigma.
const FWHM_PER_SIGMA: f64 = 2.355;

/// Half-width of the instrumental kernel, in sigmas.
const INSTRUMENT_HALF_WIDTH_SIGMAS: f64 = 4.0;

// ---------------------------------------------------------------------------
// ConvolutionKernel
// ---------------------------------------------------------------------------

/// Normalized weights on an odd-length, zero-centered offset axis.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionKernel {
    offsets: Vec<f64>,
    weights: Vec<f64>,
}

impl ConvolutionKernel {
    /// Weight 1 at offset 0.
    pub fn identity() -> Self {
        Self {
            offsets: vec![0.0],
            weights: vec![1.0],
        }
    }

    fn normalized(offsets: Vec<f64>, weights: Vec<f64>) -> ModelResult<Self> {
        let total: f64 = weights.iter().sum();
        if !(total > 0.0 && total.is_finite()) {
            return Err(ModelError::invalid(
                "kernel",
                total,
                "weights do not sum to a positive finite value",
            ));
        }
        Ok(Self {
            offsets,
            weights: weights.into_iter().map(|w| w / total).collect(),
        })
    }

    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Convolve `signal` with this kernel.
    ///
    /// The output has the same length as the input and is centered on the
    /// kernel's middle element; samples beyond either end count as zero.
    pub fn convolve(&self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len() as isize;
        let half = (self.weights.len() / 2) as isize;
        (0..n)
            .map(|i| {
                self.weights
                    .iter()
                    .enumerate()
                    .filter_map(|(j, &w)| {
                        let src = i + half - j as isize;
                        (0..n).contains(&src).then(|| w * signal[src as usize])
                    })
                    .sum()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Axis construction
// ---------------------------------------------------------------------------

/// Symmetric sampling axis around `center`.
///
/// The positive side runs `center, center + step, ...` while the offset stays
/// strictly below `half_width`; the negative side mirrors it without
/// repeating `center`. The result therefore has odd length and may stop short
/// of `±half_width`.
pub fn build_axis(center: f64, half_width: f64, step: f64) -> ModelResult<Vec<f64>> {
    if !(step > 0.0) || !step.is_finite() {
        return Err(ModelError::invalid("step", step, "must be > 0"));
    }
    if !(half_width > 0.0) || !half_width.is_finite() {
        return Err(ModelError::invalid("half_width", half_width, "must be > 0"));
    }
    let count = (0usize..)
        .take_while(|&i| (i as f64) * step < half_width)
        .count();

    let negative = (1..count).rev().map(|i| center - i as f64 * step);
    let positive = (0..count).map(|i| center + i as f64 * step);
    Ok(negative.chain(positive).collect())
}

// ---------------------------------------------------------------------------
// Rotational broadening
// ---------------------------------------------------------------------------

/// Rotational broadening kernel for projected velocity `v_rot` (km/s) at
/// `center_wavelength` (Å), sampled every `step` Å.
///
/// Points at or beyond the limb (`|offset| >= λ_L`) are omitted.
pub fn rotational_kernel(
    center_wavelength: f64,
    v_rot: f64,
    step: f64,
    limb_darkening: f64,
) -> ModelResult<ConvolutionKernel> {
    if !(v_rot >= 0.0) || !v_rot.is_finite() {
        return Err(ModelError::invalid("v_rot", v_rot, "must be >= 0"));
    }
    if !(center_wavelength > 0.0) {
        return Err(ModelError::invalid(
            "center_wavelength",
            center_wavelength,
            "must be > 0",
        ));
    }
    if !(0.0..=1.0).contains(&limb_darkening) {
        return Err(ModelError::invalid(
            "limb_darkening",
            limb_darkening,
            "must lie in [0, 1]",
        ));
    }
    if v_rot == 0.0 {
        return Ok(ConvolutionKernel::identity());
    }

    let lam_l = v_rot * KM_S_TO_ANG_S * center_wavelength / C_ANG_S;
    let norm = lam_l * (1.0 - limb_darkening / 3.0);
    let c1 = 2.0 * (1.0 - limb_darkening) / (PI * norm);
    let c2 = limb_darkening / (2.0 * norm);

    let (offsets, weights): (Vec<f64>, Vec<f64>) = build_axis(0.0, lam_l, step)?
        .into_iter()
        .filter(|x| x.abs() < lam_l)
        .map(|x| {
            let q = 1.0 - (x / lam_l).powi(2);
            (x, c1 * q.sqrt() + c2 * q)
        })
        .unzip();

    ConvolutionKernel::normalized(offsets, weights)
}

// ---------------------------------------------------------------------------
// Instrumental line-spread function
// ---------------------------------------------------------------------------

/// Gaussian line-spread kernel with FWHM `fwhm_kms` (km/s) at
/// `center_wavelength` (Å), sampled every `sample_spacing` Å out to ±4σ.
pub fn instrument_kernel(
    sample_spacing: f64,
    fwhm_kms: f64,
    center_wavelength: f64,
) -> ModelResult<ConvolutionKernel> {
    if !(fwhm_kms > 0.0) || !fwhm_kms.is_finite() {
        return Err(ModelError::invalid("fwhm_kms", fwhm_kms, "must be > 0"));
    }
    if !(center_wavelength > 0.0) {
        return Err(ModelError::invalid(
            "center_wavelength",
            center_wavelength,
            "must be > 0",
        ));
    }
    let sigma = fwhm_kms / FWHM_PER_SIGMA / C_KM_S * center_wavelength;
    let offsets = build_axis(0.0, INSTRUMENT_HALF_WIDTH_SIGMAS * sigma, sample_spacing)?;
    let weights = offsets
        .iter()
        .map(|x| (-(x * x) / (2.0 * sigma * sigma)).exp())
        .collect();

    ConvolutionKernel::normalized(offsets, weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_axis_is_odd_and_centered() {
        let axis = build_axis(0.0, 0.035, 0.01).unwrap();
        assert_eq!(axis.len(), 7);
        assert_eq!(axis[3], 0.0);
        assert_relative_eq!(axis[0], -0.03, epsilon = 1e-12);
        assert_relative_eq!(axis[6], 0.03, epsilon = 1e-12);
    }

    #[test]
    fn test_axis_stops_short_of_edge() {
        let axis = build_axis(10.0, 0.025, 0.01).unwrap();
        assert_eq!(axis.len(), 5);
        assert_eq!(axis[2], 10.0);
    }

    #[test]
    fn test_axis_rejects_bad_inputs() {
        assert!(build_axis(0.0, 1.0, 0.0).is_err());
        assert!(build_axis(0.0, 1.0, -0.1).is_err());
        assert!(build_axis(0.0, 0.0, 0.1).is_err());
        assert!(build_axis(0.0, f64::NAN, 0.1).is_err());
    }

    #[test]
    fn test_zero_rotation_is_identity() {
        let k = rotational_kernel(5170.0, 0.0, 0.01, 0.6).unwrap();
        assert_eq!(k.weights(), &[1.0]);
        assert_eq!(k.offsets(), &[0.0]);
    }

    #[test]
    fn test_rotational_kernel_stays_inside_disk() {
        let center = 5170.0;
        let k = rotational_kernel(center, 40.0, 0.01, 0.6).unwrap();
        let lam_l = 40.0 * center / C_KM_S;
        assert!(k.len() % 2 == 1);
        assert!(k.offsets().iter().all(|x| x.abs() < lam_l));
        assert!(k.weights().iter().all(|w| w.is_finite() && *w > 0.0));
        // Peak at the center, symmetric falloff.
        let mid = k.len() / 2;
        assert!(k.weights()[mid] >= k.weights()[0]);
        assert_relative_eq!(k.weights()[0], k.weights()[k.len() - 1], epsilon = 1e-12);
    }

    #[test]
    fn test_negative_rotation_rejected() {
        assert!(rotational_kernel(5170.0, -1.0, 0.01, 0.6).is_err());
    }

    #[test]
    fn test_instrument_kernel_spans_four_sigma() {
        let sigma = 6.8 / 2.355 / C_KM_S * 5170.0;
        let k = instrument_kernel(0.005, 6.8, 5170.0).unwrap();
        let last = *k.offsets().last().unwrap();
        assert!(last < 4.0 * sigma);
        assert!(last + 0.005 >= 4.0 * sigma);
    }

    #[test]
    fn test_convolve_identity() {
        let signal = vec![1.0, 2.0, 3.0];
        assert_eq!(ConvolutionKernel::identity().convolve(&signal), signal);
    }

    #[test]
    fn test_convolve_zero_pads_edges() {
        let kernel = ConvolutionKernel::normalized(vec![-1.0, 0.0, 1.0], vec![1.0, 2.0, 1.0]).unwrap();
        let out = kernel.convolve(&[1.0; 5]);
        assert_relative_eq!(out[0], 0.75);
        assert_relative_eq!(out[2], 1.0);
        assert_relative_eq!(out[4], 0.75);
    }

    #[test]
    fn test_convolve_is_true_convolution() {
        let kernel = ConvolutionKernel::normalized(vec![-1.0, 0.0, 1.0], vec![0.0, 0.0, 1.0]).unwrap();
        // Weight at +1 moves each sample one index to the right.
        assert_eq!(kernel.convolve(&[1.0, 2.0, 3.0, 4.0]), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_kernel_longer_than_signal() {
        let k = rotational_kernel(5170.0, 40.0, 0.01, 0.6).unwrap();
        let out = k.convolve(&[1.0, 1.0]);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| *v > 0.0 && *v < 1.0));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_rotational_kernel_normalized(v_rot in 0.5f64..150.0, step in 0.002f64..0.05) {
            let k = rotational_kernel(5170.0, v_rot, step, 0.6).unwrap();
            prop_assert!((k.weights().iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }

        #[test]
        fn prop_instrument_kernel_normalized(fwhm in 0.5f64..30.0, spacing in 0.001f64..0.05) {
            let k = instrument_kernel(spacing, fwhm, 6500.0).unwrap();
            prop_assert!((k.weights().iter().sum::<f64>() - 1.0).abs() < 1e-9);
            prop_assert!(k.len() % 2 == 1);
        }
    }
}
