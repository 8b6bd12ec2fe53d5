pub mod doppler;
pub mod forward;

/// Broadening kernels and same-length convolution.
///
/// Two kernels are built here:
/// - the limb-darkened rotational profile (Gray, *The Observation and Analysis
///   of Stellar Photospheres*, 3rd ed., eq. 18.14), and
/// - a Gaussian instrumental line-spread function parameterized by its FWHM
///   in velocity units.
///
/// Both are sampled on an odd-length axis centered on zero and normalized so
/// the weights sum to one. Convolution uses zero padding beyond either end of
/// the signal, so the first and last `len / 2` output samples lose flux.
pub mod kernel;

/// Flux-conserving rebinning onto an instrument's pixel grid.
///
/// Each target pixel owns the bin between the midpoints to its neighbours
/// (the outermost pixels extrapolate half a spacing outward). The model is
/// linearly interpolated at both bin edges, combined with every model sample
/// strictly inside the bin, integrated with the trapezoidal rule and divided by
/// the bin width. The result is the mean flux density over the bin.
pub mod resample;

/// Speed of light (km/s).
pub const C_KM_S: f64 = 2.997_924_58e5;

/// Speed of light (Å/s).
pub const C_ANG_S: f64 = 2.997_924_58e18;

/// One km/s expressed in Å/s.
pub const KM_S_TO_ANG_S: f64 = 1e13;
