use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::{Arc, RwLock};

use log::{debug, info};

use super::model::{FluxVector, WavelengthGrid};
use crate::error::{ModelError, ModelResult};

// ---------------------------------------------------------------------------
// Grid discretization
// ---------------------------------------------------------------------------

/// Native discretization of a synthetic library in (T_eff, log g).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridResolution {
    /// Temperature spacing between library nodes (K).
    pub temperature_step: f64,
    /// Surface-gravity spacing between library nodes (dex).
    pub gravity_step: f64,
    /// Accepted distance from a node, as a fraction of the step.
    pub tolerance: f64,
}

impl Default for GridResolution {
    fn default() -> Self {
        Self {
            temperature_step: 100.0,
            gravity_step: 0.5,
            tolerance: 1e-6,
        }
    }
}

/// Integer node coordinates of a library entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridKey {
    pub temperature: i64,
    pub gravity: i64,
}

impl GridResolution {
    /// Snap a request onto the nearest library node.
    ///
    /// Fails with `LibraryMiss` when the request lies farther than
    /// `tolerance * step` from that node on either axis.
    pub fn snap(&self, temperature: f64, surface_gravity: f64) -> ModelResult<GridKey> {
        let miss = || ModelError::LibraryMiss {
            temperature,
            surface_gravity,
        };
        let t = snap_axis(temperature, self.temperature_step, self.tolerance).ok_or_else(miss)?;
        let g = snap_axis(surface_gravity, self.gravity_step, self.tolerance).ok_or_else(miss)?;
        Ok(GridKey {
            temperature: t,
            gravity: g,
        })
    }

    /// Physical coordinates of a node.
    pub fn node(&self, key: GridKey) -> (f64, f64) {
        (
            key.temperature as f64 * self.temperature_step,
            key.gravity as f64 * self.gravity_step,
        )
    }
}

fn snap_axis(value: f64, step: f64, tolerance: f64) -> Option<i64> {
    if !value.is_finite() || step <= 0.0 {
        return None;
    }
    let index = (value / step).round();
    ((value - index * step).abs() <= tolerance * step).then_some(index as i64)
}

// ---------------------------------------------------------------------------
// SpectralLibrary – the storage collaborator
// ---------------------------------------------------------------------------

/// Source of raw synthetic spectra keyed by (T_eff, log g).
///
/// Every spectrum is returned on the same [`WavelengthGrid`].
pub trait SpectralLibrary {
    fn wavelengths(&self) -> &WavelengthGrid;

    fn resolution(&self) -> GridResolution;

    /// Raw (un-normalized) flux on [`SpectralLibrary::wavelengths`].
    fn load_flux(&self, temperature: f64, surface_gravity: f64) -> ModelResult<Vec<f64>>;
}

/// A library held entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemoryLibrary {
    wavelengths: WavelengthGrid,
    resolution: GridResolution,
    entries: BTreeMap<GridKey, Vec<f64>>,
}

impl InMemoryLibrary {
    pub fn new(wavelengths: WavelengthGrid, resolution: GridResolution) -> Self {
        Self {
            wavelengths,
            resolution,
            entries: BTreeMap::new(),
        }
    }

    /// Add a spectrum at a library node.
    pub fn insert(
        &mut self,
        temperature: f64,
        surface_gravity: f64,
        flux: Vec<f64>,
    ) -> ModelResult<()> {
        if flux.len() != self.wavelengths.len() {
            return Err(ModelError::ShapeMismatch {
                what: "library flux",
                expected: self.wavelengths.len(),
                found: flux.len(),
            });
        }
        let key = self.resolution.snap(temperature, surface_gravity)?;
        self.entries.insert(key, flux);
        Ok(())
    }

    /// Number of spectra.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the library holds no spectra.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Node coordinates of every stored spectrum, in key order.
    pub fn nodes(&self) -> Vec<(f64, f64)> {
        self.entries
            .keys()
            .map(|&key| self.resolution.node(key))
            .collect()
    }
}

impl SpectralLibrary for InMemoryLibrary {
    fn wavelengths(&self) -> &WavelengthGrid {
        &self.wavelengths
    }

    fn resolution(&self) -> GridResolution {
        self.resolution
    }

    fn load_flux(&self, temperature: f64, surface_gravity: f64) -> ModelResult<Vec<f64>> {
        let key = self.resolution.snap(temperature, surface_gravity)?;
        self.entries
            .get(&key)
            .cloned()
            .ok_or(ModelError::LibraryMiss {
                temperature,
                surface_gravity,
            })
    }
}

// ---------------------------------------------------------------------------
// FluxProvider – trimmed, normalized, cached access
// ---------------------------------------------------------------------------

/// Normalized library flux on a trimmed high-resolution grid.
///
/// Loaded entries are immutable and shared through `Arc`, so several chains
/// may read through one provider. A cache miss takes the write lock and
/// re-checks before loading, so an entry is never loaded twice.
pub struct FluxProvider<L> {
    library: L,
    grid: WavelengthGrid,
    window: Range<usize>,
    cache: RwLock<HashMap<GridKey, Arc<FluxVector>>>,
}

impl<L: SpectralLibrary> FluxProvider<L> {
    /// Serve the library's full wavelength range.
    pub fn new(library: L) -> Self {
        let window = 0..library.wavelengths().len();
        let grid = library.wavelengths().clone();
        Self {
            library,
            grid,
            window,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Serve only wavelengths strictly inside `(lo, hi)`.
    pub fn trimmed(library: L, lo: f64, hi: f64) -> ModelResult<Self> {
        let window = library.wavelengths().index_range(lo, hi);
        if window.len() < 2 {
            return Err(ModelError::OutOfRange {
                edge: lo,
                min: library.wavelengths().first(),
                max: library.wavelengths().last(),
            });
        }
        let grid = WavelengthGrid::new(library.wavelengths()[window.clone()].to_vec())?;
        debug!(
            "trimmed library grid to {} samples in ({lo:.3}, {hi:.3})",
            grid.len()
        );
        Ok(Self {
            library,
            grid,
            window,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Trim to the span of `observed` widened by `margin` on both sides.
    ///
    /// The outermost observed bins reach half a pixel past the observation,
    /// so `margin` must exceed that half pixel at either end.
    pub fn for_observation(library: L, observed: &WavelengthGrid, margin: f64) -> ModelResult<Self> {
        if !(margin >= 0.0) {
            return Err(ModelError::invalid("trim_margin", margin, "must be >= 0"));
        }
        let n = observed.len();
        if n >= 2 {
            let half_pixel = (observed[1] - observed[0]).max(observed[n - 1] - observed[n - 2]) / 2.0;
            if margin <= half_pixel {
                return Err(ModelError::invalid(
                    "trim_margin",
                    margin,
                    "must exceed half the outermost pixel spacing",
                ));
            }
        }
        Self::trimmed(library, observed.first() - margin, observed.last() + margin)
    }

    /// The high-resolution grid every returned vector is aligned with.
    pub fn grid(&self) -> &WavelengthGrid {
        &self.grid
    }

    pub fn library(&self) -> &L {
        &self.library
    }

    /// Number of cached spectra.
    pub fn cached(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Continuum-normalized flux for the library node matching the request.
    pub fn get_flux(&self, temperature: f64, surface_gravity: f64) -> ModelResult<Arc<FluxVector>> {
        let key = self.library.resolution().snap(temperature, surface_gravity)?;

        if let Ok(cache) = self.cache.read() {
            if let Some(hit) = cache.get(&key) {
                debug!("flux cache hit for T = {temperature}, log g = {surface_gravity}");
                return Ok(Arc::clone(hit));
            }
        }

        let mut cache = self.cache.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(hit) = cache.get(&key) {
            return Ok(Arc::clone(hit));
        }

        let (node_t, node_g) = self.library.resolution().node(key);
        let raw = self.library.load_flux(node_t, node_g)?;
        if raw.len() != self.library.wavelengths().len() {
            return Err(ModelError::ShapeMismatch {
                what: "library flux",
                expected: self.library.wavelengths().len(),
                found: raw.len(),
            });
        }
        let flux = Arc::new(FluxVector::normalized_to_first(
            raw[self.window.clone()].to_vec(),
        )?);
        info!("loaded library spectrum T = {node_t} K, log g = {node_g:.2}");
        cache.insert(key, Arc::clone(&flux));
        Ok(flux)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::cell::Cell;

    fn grid(n: usize) -> WavelengthGrid {
        WavelengthGrid::new((0..n).map(|i| 5000.0 + i as f64).collect()).unwrap()
    }

    struct CountingLibrary {
        inner: InMemoryLibrary,
        loads: Cell<usize>,
    }

    impl SpectralLibrary for CountingLibrary {
        fn wavelengths(&self) -> &WavelengthGrid {
            self.inner.wavelengths()
        }
        fn resolution(&self) -> GridResolution {
            self.inner.resolution()
        }
        fn load_flux(&self, t: f64, g: f64) -> ModelResult<Vec<f64>> {
            self.loads.set(self.loads.get() + 1);
            self.inner.load_flux(t, g)
        }
    }

    #[test]
    fn test_snap_within_tolerance() {
        let res = GridResolution::default();
        let key = res.snap(5700.0 + 1e-7, 4.5).unwrap();
        assert_eq!(res.node(key), (5700.0, 4.5));
        assert!(matches!(
            res.snap(5750.0, 4.5),
            Err(ModelError::LibraryMiss { .. })
        ));
        assert!(res.snap(5700.0, 4.7).is_err());
    }

    #[test]
    fn test_get_flux_normalizes_and_trims() {
        let mut lib = InMemoryLibrary::new(grid(10), GridResolution::default());
        lib.insert(5700.0, 4.5, (1..=10).map(|v| v as f64).collect())
            .unwrap();
        let provider = FluxProvider::trimmed(lib, 5002.0, 5007.0).unwrap();

        assert_eq!(provider.grid().as_slice(), &[5003.0, 5004.0, 5005.0, 5006.0]);
        let flux = provider.get_flux(5700.0, 4.5).unwrap();
        assert_relative_eq!(flux[0], 1.0);
        assert_relative_eq!(flux[3], 7.0 / 4.0);
    }

    #[test]
    fn test_cache_loads_each_node_once() {
        let mut inner = InMemoryLibrary::new(grid(4), GridResolution::default());
        inner.insert(5700.0, 4.5, vec![1.0; 4]).unwrap();
        let lib = CountingLibrary {
            inner,
            loads: Cell::new(0),
        };
        let provider = FluxProvider::new(lib);

        for _ in 0..5 {
            provider.get_flux(5700.0, 4.5).unwrap();
        }
        assert_eq!(provider.library().loads.get(), 1);
        assert_eq!(provider.cached(), 1);
    }

    #[test]
    fn test_missing_entry_is_library_miss() {
        let lib = InMemoryLibrary::new(grid(4), GridResolution::default());
        let provider = FluxProvider::new(lib);
        assert!(matches!(
            provider.get_flux(6000.0, 4.5),
            Err(ModelError::LibraryMiss { .. })
        ));
    }

    #[test]
    fn test_trim_outside_library_fails() {
        let lib = InMemoryLibrary::new(grid(4), GridResolution::default());
        assert!(FluxProvider::trimmed(lib, 6000.0, 6010.0).is_err());
    }

    #[test]
    fn test_margin_within_half_pixel_rejected() {
        let mut lib = InMemoryLibrary::new(grid(40), GridResolution::default());
        lib.insert(5700.0, 4.5, vec![1.0; 40]).unwrap();
        let pixels = WavelengthGrid::new(vec![5010.0, 5012.0, 5014.0]).unwrap();

        for margin in [0.0, 1.0] {
            assert!(matches!(
                FluxProvider::for_observation(lib.clone(), &pixels, margin),
                Err(ModelError::InvalidParameter { .. })
            ));
        }
        let provider = FluxProvider::for_observation(lib, &pixels, 3.0).unwrap();
        assert_eq!(provider.grid().first(), 5008.0);
        assert_eq!(provider.grid().last(), 5016.0);
    }
}
