use crate::error::{ModelError, ModelResult};
use crate::synth::C_KM_S;

/// Relativistic Doppler factor `sqrt((c + v_z) / (c - v_z))`.
///
/// Negative `vz` (km/s) is motion towards the observer.
pub fn doppler_factor(vz: f64) -> ModelResult<f64> {
    if !vz.is_finite() || vz.abs() >= C_KM_S {
        return Err(ModelError::invalid(
            "vz",
            vz,
            "radial velocity must satisfy |v_z| < c",
        ));
    }
    Ok(((C_KM_S + vz) / (C_KM_S - vz)).sqrt())
}

/// Map rest-frame wavelengths to the observed frame.
pub fn shift(wavelengths: &[f64], vz: f64) -> ModelResult<Vec<f64>> {
    let factor = doppler_factor(vz)?;
    Ok(wavelengths.iter().map(|w| w * factor).collect())
}
