pub mod likelihood;
pub mod output;
pub mod params;

/// Single-chain Metropolis random walk over photospheric parameters.
///
/// Each step perturbs temperature (discrete symmetric jump), radial velocity
/// and flux prefactor (zero-mean Gaussians), evaluates the candidate's
/// chi-square and accepts it with probability `min(1, exp(-(χ²_new − χ²_old)/2))`.
/// The chi-square of the current state is cached in `ChainState` and only
/// replaced on acceptance.
///
/// All randomness is drawn from a caller-supplied `rand::Rng`, so a seeded
/// generator reproduces a chain exactly.
pub mod sampler;
