//! Physical transmitter parameters.

use crate::path_loss::PathLossModel;
use nalgebra::SVector;
use serde::{Deserialize, Serialize};

/// Ground-truth description of one radio transmitter, used by the simulator
/// to synthesize fingerprint readings. `D` is the spatial dimensionality
/// (2 for floor plans, 3 for volumetric surveys).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transmitter<const D: usize> {
    /// Stable identifier (e.g. BSSID or beacon UUID string).
    pub identifier: String,
    /// True position in world coordinates (meters).
    pub position: SVector<f64, D>,
    /// Transmitted power (dBm) at the antenna.
    pub tx_power_dbm: f64,
    /// Propagation model of this transmitter's environment.
    pub model: PathLossModel,
}

impl<const D: usize> Transmitter<D> {
    pub fn new(
        identifier: impl Into<String>,
        position: SVector<f64, D>,
        tx_power_dbm: f64,
        model: PathLossModel,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            position,
            tx_power_dbm,
            model,
        }
    }

    /// Exact (noise-free) RSSI observed at `point`.
    pub fn rssi_at_position(&self, point: &SVector<f64, D>) -> f64 {
        let distance = (point - self.position).norm();
        self.model.rssi_at(self.tx_power_dbm, distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector2;

    #[test]
    fn rssi_falls_with_distance() {
        let tx = Transmitter::new(
            "ap-0",
            Vector2::new(0.0, 0.0),
            -5.0,
            PathLossModel::default(),
        );
        let near = tx.rssi_at_position(&Vector2::new(1.0, 0.0));
        let far = tx.rssi_at_position(&Vector2::new(8.0, 0.0));
        assert!(near > far);
        // At 1 m the received power is Pt + C(f, n).
        assert_abs_diff_eq!(near, -5.0 + tx.model.frequency_gain_db(), epsilon = 1e-12);
    }
}
