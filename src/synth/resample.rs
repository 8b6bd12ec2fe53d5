use std::iter;

use crate::data::model::{FluxVector, WavelengthGrid};
use crate::error::{ModelError, ModelResult};

/// Edges of the bins centered on `target`; one more than `target.len()`.
pub fn bin_edges(target: &WavelengthGrid) -> ModelResult<Vec<f64>> {
    if target.len() < 2 {
        return Err(ModelError::invalid(
            "target_wavelengths",
            target.len() as f64,
            "at least two pixels are needed to define bin edges",
        ));
    }
    let n = target.len();
    let mut edges = Vec::with_capacity(n + 1);
    edges.push(target[0] - (target[1] - target[0]) / 2.0);
    edges.extend(target.windows(2).map(|w| w[0] + (w[1] - w[0]) / 2.0));
    edges.push(target[n - 1] + (target[n - 1] - target[n - 2]) / 2.0);
    Ok(edges)
}

/// Linear interpolation of `(x, y)` at `at`, which must lie within `x`.
pub fn interpolate(x: &WavelengthGrid, y: &[f64], at: f64) -> ModelResult<f64> {
    if y.len() != x.len() {
        return Err(ModelError::ShapeMismatch {
            what: "interpolated values",
            expected: x.len(),
            found: y.len(),
        });
    }
    if !(at >= x.first() && at <= x.last()) {
        return Err(ModelError::OutOfRange {
            edge: at,
            min: x.first(),
            max: x.last(),
        });
    }
    let upper = x.partition_point(|&w| w <= at);
    if upper == x.len() {
        return Ok(y[x.len() - 1]);
    }
    let lower = upper - 1;
    let t = (at - x[lower]) / (x[upper] - x[lower]);
    Ok(y[lower] + t * (y[upper] - y[lower]))
}

/// Resample `model_flux` (on `model_wavelengths`) onto the bins of `target`.
pub fn rebin(
    model_wavelengths: &WavelengthGrid,
    model_flux: &[f64],
    target: &WavelengthGrid,
) -> ModelResult<FluxVector> {
    if model_flux.len() != model_wavelengths.len() {
        return Err(ModelError::ShapeMismatch {
            what: "model flux",
            expected: model_wavelengths.len(),
            found: model_flux.len(),
        });
    }
    let edges = bin_edges(target)?;

    edges
        .windows(2)
        .map(|bin| bin_mean(model_wavelengths, model_flux, bin[0], bin[1]))
        .collect::<ModelResult<Vec<f64>>>()
        .map(FluxVector::new)
}

fn bin_mean(w: &WavelengthGrid, f: &[f64], bin0: f64, bin1: f64) -> ModelResult<f64> {
    let f0 = interpolate(w, f, bin0)?;
    let f1 = interpolate(w, f, bin1)?;
    let inside = w.index_range(bin0, bin1);

    let points = iter::once((bin0, f0))
        .chain(inside.map(|i| (w[i], f[i])))
        .chain(iter::once((bin1, f1)));

    let mut previous: Option<(f64, f64)> = None;
    let mut integral = 0.0;
    for (x, y) in points {
        if let Some((px, py)) = previous {
            integral += 0.5 * (x - px) * (y + py);
        }
        previous = Some((x, y));
    }
    Ok(integral / (bin1 - bin0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid(values: Vec<f64>) -> WavelengthGrid {
        WavelengthGrid::new(values).unwrap()
    }

    fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
        let step = (stop - start) / (n - 1) as f64;
        (0..n).map(|i| start + i as f64 * step).collect()
    }

    #[test]
    fn test_edges_extrapolate_half_spacing() {
        let edges = bin_edges(&grid(vec![1.0, 2.0, 4.0])).unwrap();
        assert_eq!(edges, vec![0.5, 1.5, 3.0, 5.0]);
    }

    #[test]
    fn test_single_pixel_target_rejected() {
        assert!(bin_edges(&grid(vec![1.0])).is_err());
    }

    #[test]
    fn test_constant_flux_is_preserved() {
        let model = grid(linspace(5160.0, 5180.0, 2001));
        let flux = vec![0.83; model.len()];
        // Uneven target bins, some narrower than the model spacing.
        let target = grid(vec![5165.0, 5165.004, 5166.0, 5168.5, 5169.0, 5175.25]);
        let out = rebin(&model, &flux, &target).unwrap();
        assert_eq!(out.len(), target.len());
        for v in out.iter() {
            assert_relative_eq!(*v, 0.83, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_linear_flux_gives_bin_center_value() {
        let model = grid(linspace(5160.0, 5180.0, 401));
        let flux: Vec<f64> = model.iter().map(|w| 0.1 * (w - 5160.0) + 1.0).collect();
        let target = grid(vec![5168.0, 5169.0, 5170.0]);
        let out = rebin(&model, &flux, &target).unwrap();
        for (t, v) in target.iter().zip(out.iter()) {
            assert_relative_eq!(*v, 0.1 * (t - 5160.0) + 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_same_sampling_reproduces_flux() {
        let model = grid(linspace(5160.0, 5170.0, 1001));
        let flux: Vec<f64> = model
            .iter()
            .map(|w| 1.0 - 0.3 * (-(w - 5165.0).powi(2) / 0.5).exp())
            .collect();
        // Outermost bins would extend past the model span.
        let target = grid(model[1..model.len() - 1].to_vec());
        let out = rebin(&model, &flux, &target).unwrap();
        for (v, f) in out.iter().zip(&flux[1..flux.len() - 1]) {
            assert_relative_eq!(*v, *f, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_same_sampling_full_grid_is_out_of_range() {
        let model = grid(vec![1.0, 2.0, 3.0]);
        let err = rebin(&model, &[1.0, 1.0, 1.0], &model).unwrap_err();
        assert!(matches!(err, ModelError::OutOfRange { edge, .. } if edge == 0.5));
    }

    #[test]
    fn test_bin_integral_is_conserved() {
        let model = grid(linspace(0.0, 10.0, 10001));
        let flux: Vec<f64> = model.iter().map(|w| 2.0 + w.sin()).collect();
        let target = grid(vec![2.0, 3.0, 4.0, 5.0]);
        let out = rebin(&model, &flux, &target).unwrap();
        let edges = bin_edges(&target).unwrap();
        for (bin, v) in edges.windows(2).zip(out.iter()) {
            let exact = 2.0 * (bin[1] - bin[0]) + (bin[0].cos() - bin[1].cos());
            assert_relative_eq!(v * (bin[1] - bin[0]), exact, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_interpolate_at_upper_end() {
        let x = grid(vec![1.0, 2.0]);
        assert_eq!(interpolate(&x, &[3.0, 5.0], 2.0).unwrap(), 5.0);
        assert_eq!(interpolate(&x, &[3.0, 5.0], 1.5).unwrap(), 4.0);
        assert!(interpolate(&x, &[3.0, 5.0], 2.5).is_err());
    }

    #[test]
    fn test_interpolate_rejects_short_values() {
        let x = grid(vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            interpolate(&x, &[3.0, 5.0], 2.5),
            Err(ModelError::ShapeMismatch { expected: 3, found: 2, .. })
        ));
    }

    #[test]
    fn test_flux_length_mismatch() {
        let model = grid(vec![1.0, 2.0, 3.0]);
        let target = grid(vec![1.5, 2.5]);
        assert!(matches!(
            rebin(&model, &[1.0], &target),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }
}
