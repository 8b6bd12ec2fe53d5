use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in photospheric parameter space.
///
/// The sampler walks `temperature`, `radial_velocity` and `flux_prefactor`;
/// `rotational_velocity` and `surface_gravity` are carried along unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterVector {
    /// Effective temperature (K).
    pub temperature: f64,
    /// Radial velocity (km/s), negative towards the observer.
    pub radial_velocity: f64,
    /// Multiplicative flux scale.
    pub flux_prefactor: f64,
    /// Projected rotational velocity v sin i (km/s).
    pub rotational_velocity: f64,
    /// log g (cgs dex).
    pub surface_gravity: f64,
}

impl Default for ParameterVector {
    fn default() -> Self {
        Self {
            temperature: 5700.0,
            radial_velocity: -30.0,
            flux_prefactor: 1.0,
            rotational_velocity: 40.0,
            surface_gravity: 4.5,
        }
    }
}

impl ParameterVector {
    /// Whether every component lies in its physical domain.
    pub fn is_physical(&self) -> bool {
        self.temperature > 0.0
            && self.flux_prefactor > 0.0
            && self.rotational_velocity >= 0.0
            && self.radial_velocity.is_finite()
            && self.surface_gravity.is_finite()
    }
}

impl fmt::Display for ParameterVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "T={:.0} K, vz={:.3} km/s, pref={:.4}, vsini={:.1} km/s, logg={:.2}",
            self.temperature,
            self.radial_velocity,
            self.flux_prefactor,
            self.rotational_velocity,
            self.surface_gravity
        )
    }
}
