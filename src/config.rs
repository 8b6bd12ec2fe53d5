use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::library::GridResolution;
use crate::fit::likelihood::NoiseModel;
use crate::fit::params::ParameterVector;
use crate::fit::sampler::{MissPolicy, ProposalConfig};
use crate::synth::forward::ModelSettings;

// ---------------------------------------------------------------------------
// FitConfig – everything a run needs, loaded from JSON
// ---------------------------------------------------------------------------

/// Run configuration.  Every section has a default, so a partial file is valid:
///
/// ```json
/// {
///   "observation": "GWOri_cn/23.txt",
///   "library": "phoenix_5150_5200.parquet",
///   "output": "run_0.csv",
///   "initial": { "temperature": 5700, "radial_velocity": -30 },
///   "steps": 10,
///   "seed": 42
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Observed spectrum for a single order.
    pub observation: PathBuf,
    /// Synthetic spectral library.
    pub library: PathBuf,
    /// Chain table destination; extension picks the format.
    pub output: PathBuf,
    /// Starting point of the chain.
    pub initial: ParameterVector,
    /// Number of Metropolis steps.
    pub steps: usize,
    /// Seed for a reproducible chain; entropy-seeded when absent.
    pub seed: Option<u64>,
    pub noise: NoiseModel,
    pub model: ModelSettings,
    pub proposal: ProposalConfig,
    pub grid: GridConfig,
    /// Library wavelengths kept beyond each end of the observation (Å).
    pub trim_margin: f64,
    pub miss_policy: MissPolicy,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            observation: PathBuf::from("observation.txt"),
            library: PathBuf::from("library.parquet"),
            output: PathBuf::from("run_0.csv"),
            initial: ParameterVector::default(),
            steps: 10,
            seed: None,
            noise: NoiseModel::default(),
            model: ModelSettings::default(),
            proposal: ProposalConfig::default(),
            grid: GridConfig::default(),
            trim_margin: 10.0,
            miss_policy: MissPolicy::default(),
        }
    }
}

/// Serializable mirror of [`GridResolution`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub temperature_step: f64,
    pub gravity_step: f64,
    pub tolerance: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        let res = GridResolution::default();
        Self {
            temperature_step: res.temperature_step,
            gravity_step: res.gravity_step,
            tolerance: res.tolerance,
        }
    }
}

impl From<GridConfig> for GridResolution {
    fn from(g: GridConfig) -> Self {
        GridResolution {
            temperature_step: g.temperature_step,
            gravity_step: g.gravity_step,
            tolerance: g.tolerance,
        }
    }
}

impl FitConfig {
    /// Read and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: FitConfig = serde_json::from_str(&text).context("parsing config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        self.proposal.validate().context("proposal")?;
        if !self.initial.is_physical() {
            bail!("initial parameters lie outside the physical domain: {}", self.initial);
        }
        if let NoiseModel::Constant(sigma) = self.noise {
            if !(sigma > 0.0) {
                bail!("noise sigma must be > 0, got {sigma}");
            }
        }
        if !(self.trim_margin >= 0.0) {
            bail!("trim_margin must be >= 0, got {}", self.trim_margin);
        }
        if !(self.model.rotation_step > 0.0) || !(self.model.instrument_fwhm_kms > 0.0) {
            bail!("model rotation_step and instrument_fwhm_kms must be > 0");
        }
        if !(self.grid.temperature_step > 0.0 && self.grid.gravity_step > 0.0) {
            bail!("library grid steps must be > 0");
        }
        Ok(())
    }
}
