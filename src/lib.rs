// Forward modelling of echelle-order stellar spectra from a synthetic
// library, and Metropolis sampling of photospheric parameters.
//
// The pipeline for one parameter vector is
// library flux → rotational broadening → Doppler shift → instrumental
// broadening → flux-conserving rebin → prefactor, scored by chi-square
// against the observation.

pub mod config;

/// Data layer: core types, library access, and loading.
///
/// Architecture:
/// ```text
///  .txt / .csv / .json / .parquet          .parquet / .json
///        │ (observation)                        │ (library)
///        ▼                                      ▼
///   ┌──────────┐                          ┌──────────┐
///   │  loader   │  parse → Observation    │  loader   │  parse → InMemoryLibrary
///   └──────────┘                          └──────────┘
///                                               │
///                                               ▼
///                                        ┌──────────────┐
///                                        │ FluxProvider  │  trim, normalize, cache
///                                        └──────────────┘
/// ```
pub mod data;

pub mod error;

/// Parameter-space exploration: likelihood, Metropolis sampler, chain tables.
pub mod fit;

/// Forward-model synthesis: broadening, Doppler shift, resampling.
///
/// Architecture:
/// ```text
///   library flux (high-res grid)
///        │
///        ▼
///   ┌──────────┐
///   │  kernel   │  rotational profile, convolve
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  doppler  │  shift the high-res grid by v_z
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  kernel   │  instrumental Gaussian, convolve
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ resample  │  flux-conserving rebin onto observed pixels
///   └──────────┘
/// ```
///
/// `forward` strings these stages together.
pub mod synth;

pub use data::library::{FluxProvider, GridResolution, InMemoryLibrary, SpectralLibrary};
pub use data::model::{FluxVector, Observation, WavelengthGrid};
pub use error::{ModelError, ModelResult};
pub use fit::likelihood::{chi_square, Likelihood, NoiseModel, Target};
pub use fit::params::ParameterVector;
pub use fit::sampler::{ChainOutput, ChainState, ProposalConfig, SampleRecord, Sampler};
pub use synth::forward::{ForwardModel, ModelSettings};
