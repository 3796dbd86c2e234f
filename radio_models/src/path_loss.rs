//! Log-distance path-loss model in the dB domain.
//!
//! # Propagation law
//! Pr(d) = Pt + C(f, n) − 10·n·log10(d)
//!
//! where `n` is the path-loss exponent (2.0 in free space) and
//! C(f, n) = 10·n·log10(c / (4π·f)) folds the wavelength constants of the
//! Friis equation into a single frequency-dependent gain. All powers are in
//! dBm, distances in meters, frequencies in Hz.

use serde::{Deserialize, Serialize};

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Distances below this are clamped before taking logarithms.
pub const MIN_DISTANCE: f64 = 1e-12;

/// Log-distance propagation model for one carrier frequency.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PathLossModel {
    /// Path-loss exponent `n` (2.0 = free space, 3–4 typical indoors).
    pub exponent: f64,
    /// Carrier frequency (Hz).
    pub frequency_hz: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        Self {
            exponent: 2.0,
            frequency_hz: 2.4e9, // 2.4 GHz WiFi band
        }
    }
}

impl PathLossModel {
    pub fn new(exponent: f64, frequency_hz: f64) -> Self {
        Self {
            exponent,
            frequency_hz,
        }
    }

    /// Frequency-dependent gain C(f, n) = 10·n·log10(c / (4π·f)) in dB.
    pub fn frequency_gain_db(&self) -> f64 {
        let k = SPEED_OF_LIGHT / (4.0 * std::f64::consts::PI * self.frequency_hz);
        10.0 * self.exponent * k.log10()
    }

    /// Received power (dBm) at `distance_m` meters from a transmitter
    /// radiating `tx_power_dbm`.
    pub fn rssi_at(&self, tx_power_dbm: f64, distance_m: f64) -> f64 {
        let d = distance_m.max(MIN_DISTANCE);
        tx_power_dbm + self.frequency_gain_db() - 10.0 * self.exponent * d.log10()
    }

    /// Inverse of [`rssi_at`](Self::rssi_at): distance (m) at which
    /// `rssi_dbm` would be received from `tx_power_dbm`.
    pub fn distance_for_rssi(&self, tx_power_dbm: f64, rssi_dbm: f64) -> f64 {
        let exp = (tx_power_dbm + self.frequency_gain_db() - rssi_dbm) / (10.0 * self.exponent);
        10f64.powf(exp)
    }

    /// RSSI drop (dB) going from distance `d_near` to `d_far`.
    /// Positive when `d_far > d_near`.
    pub fn attenuation_between(&self, d_near: f64, d_far: f64) -> f64 {
        let near = d_near.max(MIN_DISTANCE);
        let far = d_far.max(MIN_DISTANCE);
        10.0 * self.exponent * (far / near).log10()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn free_space_gain_at_2_4ghz() {
        // c / (4π·2.4e9) ≈ 9.94e-3 m, so C ≈ 20·log10(9.94e-3) ≈ -40.05 dB
        let model = PathLossModel::new(2.0, 2.4e9);
        assert_abs_diff_eq!(model.frequency_gain_db(), -40.05, epsilon = 0.05);
    }

    #[test]
    fn rssi_distance_roundtrip() {
        let model = PathLossModel::new(2.7, 5.0e9);
        let rssi = model.rssi_at(-10.0, 35.0);
        let d = model.distance_for_rssi(-10.0, rssi);
        assert_abs_diff_eq!(d, 35.0, epsilon = 1e-9);
    }

    #[test]
    fn doubling_distance_drops_6db_in_free_space() {
        let model = PathLossModel::new(2.0, 2.4e9);
        let near = model.rssi_at(0.0, 10.0);
        let far = model.rssi_at(0.0, 20.0);
        assert_abs_diff_eq!(near - far, 6.02, epsilon = 0.01);
        assert_abs_diff_eq!(model.attenuation_between(10.0, 20.0), near - far, epsilon = 1e-12);
    }
}
